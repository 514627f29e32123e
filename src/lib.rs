//! Reliable UDP for real-time applications.
//!
//! A [socket::Socket] multiplexes connections to remote peers over a single datagram socket. Each
//!  connection sends application objects in individual packets and tells the application, for
//!  every object, whether it was delivered or lost. There are no retransmissions: it is up to the
//!  application to decide whether a lost object's content is still worth sending.
//!
//! All protocol work happens on the socket's network thread. The application talks to it by
//!  queueing commands (connect, send, ...) and by polling for [event::SocketEvent]s.
//!
//! ## Wire format
//!
//! Every packet starts with a header, all fields little endian and bit packed:
//!
//! ```ascii
//! +-----------------+-----------------+-------------------+----------------+----------------+
//! | obj seq (15)    | ack seq (15)    | ack history       | ack time (16)  | bit size (16)  |
//! | + object flag   | + object flag   | (ack redundancy)  | optional       | optional       |
//! +-----------------+-----------------+-------------------+----------------+----------------+
//! ```
//!
//! The lowest bit of the first byte tells object packets from command packets. A command packet's
//!  payload is a single command byte, an object packet's payload is whatever the connection's
//!  [codec::MessageCodec] writes.

pub mod bit_stream;
pub mod codec;
pub mod config;
pub mod connection;
pub mod end_point;
pub mod event;
pub mod logging;
pub mod network_loop;
pub mod packet_header;
pub mod platform;
pub mod socket;
pub mod test_util;
pub mod util;
