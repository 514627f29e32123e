use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;
use tracing::error;
use crate::bit_stream::BitStream;
use crate::codec::{CodecContext, MessageCodec};
use crate::config::RudpConfig;
use crate::end_point::EndPoint;
use crate::event::{Command, CommandQueue, ConnectionOption, SendFailReason, SocketEvent};
use crate::logging::{log_debug, log_trace};
use crate::network_loop::NetworkIo;
use crate::packet_header::PacketHeader;
use crate::platform::PlatformError;
use crate::util::ring_buffer::RingBuffer;
use crate::util::safe_converter::{PrecheckedCast, SafeCast};
use crate::util::sequence::SequenceNumber;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    None,
    Connecting,
    Connected,
    /// terminal, the connection is destroyed on the next timeout sweep
    Disconnected,
    Destroy,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ConnectionMode {
    /// the side that sent the connect request
    Initiator,
    Acceptor,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    SequenceOutOfBounds,
    IncorrectCommand,
    SendWindowFull,
}

/// The payload byte of a command packet. All values are even so that the low bit of the
///  first payload byte agrees with the packet header's object flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub(crate) enum CommandType {
    Connect = 2,
    Accepted = 4,
    Refused = 6,
    Disconnected = 8,
    Ping = 10,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ConnectionStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_delivered: u64,
    pub commands_sent: u64,
    pub commands_received: u64,
}

/// A connection's state as last published by the network thread
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// round trip time without the peer's processing delays, in seconds
    pub network_ping: f32,
    /// total round trip time, in seconds
    pub aliased_ping: f32,
    pub mtu: usize,
    pub window_fill_ratio: f32,
    pub stats: ConnectionStats,
}

impl ConnectionStatus {
    fn initial(config: &RudpConfig) -> ConnectionStatus {
        ConnectionStatus {
            state: ConnectionState::Connecting,
            network_ping: config.default_network_ping,
            aliased_ping: config.default_aliased_ping,
            mtu: config.default_mtu,
            window_fill_ratio: 0.0,
            stats: ConnectionStats::default(),
        }
    }
}

/// The part of a connection that is visible outside the network thread
pub struct ConnectionShared {
    id: u64,
    remote: EndPoint,
    is_initiator: bool,
    status: Mutex<ConnectionStatus>,
}

impl ConnectionShared {
    pub(crate) fn new(id: u64, remote: EndPoint, mode: ConnectionMode, config: &RudpConfig) -> ConnectionShared {
        ConnectionShared {
            id,
            remote,
            is_initiator: mode == ConnectionMode::Initiator,
            status: Mutex::new(ConnectionStatus::initial(config)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn remote(&self) -> EndPoint {
        self.remote
    }
}

/// The application's reference to a connection. All operations are forwarded to the socket's
///  network thread, and all accessors return the state that the network thread last published.
///
/// Handles are equal if they refer to the same connection. A new connection to the same remote
///  end point is a different connection.
pub struct ConnectionHandle<T> {
    shared: Arc<ConnectionShared>,
    commands: Arc<CommandQueue<T>>,
}

impl<T> Clone for ConnectionHandle<T> {
    fn clone(&self) -> Self {
        ConnectionHandle {
            shared: self.shared.clone(),
            commands: self.commands.clone(),
        }
    }
}

impl<T> PartialEq for ConnectionHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.shared.id == other.shared.id
    }
}
impl<T> Eq for ConnectionHandle<T> {}

impl<T> Hash for ConnectionHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.shared.id.hash(state);
    }
}

impl<T> Debug for ConnectionHandle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CONN#{}@{:?}", self.shared.id, self.shared.remote)
    }
}

impl<T> ConnectionHandle<T> {
    pub(crate) fn new(shared: Arc<ConnectionShared>, commands: Arc<CommandQueue<T>>) -> ConnectionHandle<T> {
        ConnectionHandle { shared, commands }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn remote_end_point(&self) -> EndPoint {
        self.shared.remote
    }

    pub fn is_initiator(&self) -> bool {
        self.shared.is_initiator
    }

    /// The object's fate is reported through a later event: delivered, lost, send failed or
    ///  rejected
    pub fn send(&self, object: T) {
        self.commands.push(Command::Send { connection: self.shared.clone(), object });
    }

    pub fn disconnect(&self) {
        self.commands.push(Command::Disconnect { connection: self.shared.clone() });
    }

    pub fn set_option(&self, option: ConnectionOption) {
        self.commands.push(Command::ConnectionOption { connection: self.shared.clone(), option });
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.lock().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn network_ping(&self) -> f32 {
        self.shared.status.lock().network_ping
    }

    pub fn aliased_ping(&self) -> f32 {
        self.shared.status.lock().aliased_ping
    }

    pub fn mtu(&self) -> usize {
        self.shared.status.lock().mtu
    }

    pub fn window_fill_ratio(&self) -> f32 {
        self.shared.status.lock().window_fill_ratio
    }

    pub fn stats(&self) -> ConnectionStats {
        self.shared.status.lock().stats
    }
}


/// a packet that was sent and is waiting for its ack (or for being declared lost)
struct PendingPacket<T> {
    sequence: SequenceNumber,
    object: Option<T>,
    send_time: u64,
}

/// The protocol state machine for a single remote peer. This lives exclusively on the network
///  thread.
pub(crate) struct Connection<C: MessageCodec> {
    handle: ConnectionHandle<C::Object>,
    mode: ConnectionMode,
    state: ConnectionState,
    codec: C,
    codec_ctx: CodecContext<C::Object>,
    mtu: usize,
    always_send_mtu: bool,
    network_rtt: f32,
    aliased_rtt: f32,

    send_time: u64,
    send_sequence: SequenceNumber,
    send_window: RingBuffer<PendingPacket<C::Object>>,

    recv_time: u64,
    recv_sequence: SequenceNumber,
    recv_history: u64,
    recv_since_last_send: u32,

    connect_timeout: u64,
    connect_attempts: u32,

    stats: ConnectionStats,
}

impl<C: MessageCodec> Connection<C> {
    pub fn new(handle: ConnectionHandle<C::Object>, mode: ConnectionMode, codec: C, config: &RudpConfig, now: u64) -> Connection<C> {
        Connection {
            handle,
            mode,
            state: ConnectionState::Connecting,
            codec,
            codec_ctx: CodecContext::default(),
            mtu: config.default_mtu,
            always_send_mtu: config.default_always_send_mtu,
            network_rtt: config.default_network_ping,
            aliased_rtt: config.default_aliased_ping,
            send_time: now,
            send_sequence: SequenceNumber::ZERO,
            send_window: RingBuffer::new(config.packet_window),
            recv_time: now,
            recv_sequence: SequenceNumber::ZERO,
            recv_history: 0,
            recv_since_last_send: 0,
            connect_timeout: 0,
            connect_attempts: 0,
            stats: ConnectionStats::default(),
        }
    }

    pub fn id(&self) -> u64 {
        self.handle.id()
    }

    pub fn remote(&self) -> EndPoint {
        self.handle.remote_end_point()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn is_initiator(&self) -> bool {
        self.mode == ConnectionMode::Initiator
    }

    /// makes the current state visible to the connection's handles
    pub fn publish(&self) {
        *self.handle.shared.status.lock() = ConnectionStatus {
            state: self.state,
            network_ping: self.network_rtt,
            aliased_ping: self.aliased_rtt,
            mtu: self.mtu,
            window_fill_ratio: self.send_window.fill_ratio(),
            stats: self.stats,
        };
    }

    pub fn change_state(&mut self, io: &mut NetworkIo<C::Object>, new_state: ConnectionState) {
        if new_state == self.state {
            return;
        }

        let old_state = self.state;
        self.state = new_state;
        log_debug!(io.log, "connection to {}: {:?} -> {:?}", self.remote(), old_state, new_state);

        match new_state {
            ConnectionState::Connected => {
                if old_state == ConnectionState::Connecting {
                    if !self.is_initiator() {
                        self.send_command(io, CommandType::Accepted);
                    }
                    io.raise(SocketEvent::Connected { connection: self.handle.clone() });
                }
            }
            ConnectionState::Disconnected => {
                match old_state {
                    ConnectionState::Connected => {
                        while let Some(packet) = self.send_window.pop_front() {
                            if let Some(object) = packet.object {
                                self.object_lost(io, object);
                            }
                        }
                        io.raise(SocketEvent::Disconnected { connection: self.handle.clone() });
                    }
                    ConnectionState::Connecting => {
                        io.raise(SocketEvent::ConnectFailed { end_point: self.remote() });
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }

    fn protocol_error(&mut self, io: &mut NetworkIo<C::Object>, error: ProtocolError) {
        log_debug!(io.log, "error {:?} on connection to {}", error, self.remote());
        self.change_state(io, ConnectionState::Disconnected);
    }

    pub fn on_packet(&mut self, io: &mut NetworkIo<C::Object>, buf: &mut BitStream) {
        self.recv_time = io.now;

        let header = PacketHeader::unpack(buf, &io.config);
        log_trace!(io.log, "received {:?} from {}", header, self.remote());

        if header.is_object {
            self.on_object_received(io, buf, &header);
        }
        else {
            self.on_command_received(io, buf, &header);
        }
    }

    /// Applies a received header to the receive sequence and the send window. Returns `false` if
    ///  the packet should be ignored.
    fn parse_header(&mut self, io: &mut NetworkIo<C::Object>, header: &PacketHeader) -> bool {
        let distance = header.obj_sequence.distance(self.recv_sequence);
        let window = io.config.packet_window as i32;

        if distance > window || distance < -window {
            self.protocol_error(io, ProtocolError::SequenceOutOfBounds);
            return false;
        }
        if distance <= 0 {
            log_trace!(io.log, "dropping old packet {} from {}", header.obj_sequence, self.remote());
            return false;
        }

        if distance >= io.config.ack_redundancy as i32 {
            self.recv_history = 1;
        }
        else {
            self.recv_history = (self.recv_history << distance) | 1;
        }

        self.recv_sequence = header.obj_sequence;
        self.recv_since_last_send += 1;

        self.ack_handles(io, header);
        true
    }

    /// Resolves all pending packets up to the header's ack sequence, oldest first
    fn ack_handles(&mut self, io: &mut NetworkIo<C::Object>, header: &PacketHeader) {
        let redundancy = io.config.ack_redundancy as i32;

        while let Some(oldest) = self.send_window.front() {
            let distance = oldest.sequence.distance(header.ack_sequence);
            if distance > 0 {
                break;
            }

            let Some(packet) = self.send_window.pop_front() else {
                break;
            };

            if let Some(object) = packet.object {
                if distance <= -redundancy {
                    self.object_lost(io, object);
                }
                else if header.ack_history & (1u64 << -distance) != 0 {
                    self.object_delivered(io, object);
                }
                else {
                    self.object_lost(io, object);
                }
            }

            if distance == 0 && header.ack_time > 0 {
                self.update_ping(io, packet.send_time, header.ack_time);
            }
        }
    }

    fn update_ping(&mut self, io: &NetworkIo<C::Object>, send_time: u64, ack_time: u16) {
        let aliased = self.recv_time.saturating_sub(send_time);
        self.aliased_rtt = self.aliased_rtt * 0.9 + (aliased as f32 / 1000.0) * 0.1;

        if io.config.calculate_network_ping {
            let network = aliased - (ack_time as u64).min(aliased);
            self.network_rtt = self.network_rtt * 0.9 + (network as f32 / 1000.0) * 0.1;
        }
    }

    fn object_lost(&mut self, io: &mut NetworkIo<C::Object>, object: C::Object) {
        self.stats.packets_lost += 1;
        io.raise(SocketEvent::ObjectLost { connection: self.handle.clone(), object });
    }

    fn object_delivered(&mut self, io: &mut NetworkIo<C::Object>, object: C::Object) {
        self.stats.packets_delivered += 1;
        io.raise(SocketEvent::ObjectDelivered { connection: self.handle.clone(), object });
    }

    fn send_failed(&self, io: &mut NetworkIo<C::Object>, object: C::Object, reason: SendFailReason) {
        io.raise(SocketEvent::ObjectSendFailed { connection: self.handle.clone(), object, reason });
    }

    fn on_object_received(&mut self, io: &mut NetworkIo<C::Object>, buf: &mut BitStream, header: &PacketHeader) {
        self.ensure_initiator_connected(io);

        if self.state != ConnectionState::Connected {
            return;
        }

        if self.parse_header(io, header) {
            let header_bits = io.config.header_bits();
            if io.config.write_packet_bit_size {
                let payload_bits: usize = header.bit_size.safe_cast();
                buf.set_length_bits((header_bits + payload_bits).min(buf.length_bits()));
            }
            buf.set_position(header_bits);

            if let Some(object) = self.codec.unpack(buf) {
                io.raise(SocketEvent::ObjectReceived { connection: self.handle.clone(), object });
            }
            self.stats.packets_received += 1;
        }
    }

    fn on_command_received(&mut self, io: &mut NetworkIo<C::Object>, buf: &mut BitStream, header: &PacketHeader) {
        if !self.parse_header(io, header) {
            return;
        }
        self.stats.commands_received += 1;

        buf.set_position(io.config.header_bits());
        let raw = buf.read_u8(8);

        match CommandType::try_from(raw) {
            Ok(CommandType::Connect) => self.on_command_connect(io),
            Ok(CommandType::Accepted) => self.on_command_accepted(io),
            Ok(CommandType::Refused) => self.on_command_refused(io),
            Ok(CommandType::Disconnected) => self.on_command_disconnected(io),
            Ok(CommandType::Ping) => self.ensure_initiator_connected(io),
            Err(_) => {
                log_debug!(io.log, "unknown command {} from {}", raw, self.remote());
                self.protocol_error(io, ProtocolError::IncorrectCommand);
            }
        }
    }

    fn on_command_connect(&mut self, io: &mut NetworkIo<C::Object>) {
        if self.is_initiator() {
            self.protocol_error(io, ProtocolError::IncorrectCommand);
        }
        else if self.state == ConnectionState::Connected {
            // our 'accepted' got lost
            self.send_command(io, CommandType::Accepted);
        }
    }

    fn on_command_accepted(&mut self, io: &mut NetworkIo<C::Object>) {
        if !self.is_initiator() {
            self.protocol_error(io, ProtocolError::IncorrectCommand);
        }
        else if self.state == ConnectionState::Connecting {
            self.change_state(io, ConnectionState::Connected);
        }
    }

    fn on_command_refused(&mut self, io: &mut NetworkIo<C::Object>) {
        if !self.is_initiator() {
            self.protocol_error(io, ProtocolError::IncorrectCommand);
        }
        else if self.state == ConnectionState::Connecting {
            io.raise(SocketEvent::ConnectRefused { end_point: self.remote() });
            self.change_state(io, ConnectionState::Destroy);
        }
    }

    fn on_command_disconnected(&mut self, io: &mut NetworkIo<C::Object>) {
        self.ensure_initiator_connected(io);

        if self.state == ConnectionState::Connected {
            self.change_state(io, ConnectionState::Disconnected);
        }
    }

    /// implicit accept: regular traffic from the peer while we are waiting for 'accepted'
    fn ensure_initiator_connected(&mut self, io: &mut NetworkIo<C::Object>) {
        if self.is_initiator() && self.state == ConnectionState::Connecting && io.config.allow_implicit_accept {
            self.change_state(io, ConnectionState::Connected);
        }
    }

    fn check_can_send(&mut self, io: &mut NetworkIo<C::Object>, sending_command: bool) -> Result<(), SendFailReason> {
        if self.state == ConnectionState::Connected && !self.send_window.is_full() {
            return Ok(());
        }

        if sending_command && self.is_initiator() && self.state == ConnectionState::Connecting {
            return Ok(());
        }

        if self.send_window.is_full() {
            self.protocol_error(io, ProtocolError::SendWindowFull);
            return Err(SendFailReason::PacketWindowFull);
        }

        Err(SendFailReason::NotConnected)
    }

    fn make_header(&self, io: &NetworkIo<C::Object>, is_object: bool, payload_bits: usize) -> PacketHeader {
        let max_ping: u64 = io.config.max_ping.safe_cast();
        let ack_time = io.now.saturating_sub(self.recv_time)
            .min(max_ping)
            .min(u16::MAX as u64);

        PacketHeader {
            obj_sequence: self.send_sequence.next(),
            ack_sequence: self.recv_sequence,
            ack_history: self.recv_history,
            ack_time: ack_time.prechecked_cast(),
            is_object,
            bit_size: payload_bits.min(u16::MAX as usize).prechecked_cast(),
        }
    }

    /// Writes the header in front of the payload that is already in the write stream, and sends
    ///  the packet
    fn transmit(&mut self, io: &mut NetworkIo<C::Object>, header: &PacketHeader, expand_to_mtu: bool) -> Result<(), PlatformError> {
        let payload_end = io.write_stream.save_position();
        io.write_stream.set_position(0);
        header.pack(&mut io.write_stream, &io.config);
        io.write_stream.load_position(payload_end);

        self.send_time = io.now;
        self.send_sequence = header.obj_sequence;
        self.recv_since_last_send = 0;

        let min_len = if expand_to_mtu { self.mtu } else { 0 };
        io.send_write_stream(self.remote(), min_len)
    }

    fn track(&mut self, io: &mut NetworkIo<C::Object>, header: &PacketHeader, object: Option<C::Object>) {
        let packet = PendingPacket {
            sequence: header.obj_sequence,
            object,
            send_time: io.now,
        };

        if let Err(packet) = self.send_window.push_back(packet) {
            // only connect requests are sent on a full window
            log_debug!(io.log, "send window to {} is full, not tracking packet {}", self.remote(), packet.sequence);
            if let Some(object) = packet.object {
                self.object_lost(io, object);
            }
        }
    }

    pub fn send_object(&mut self, io: &mut NetworkIo<C::Object>, object: C::Object) {
        self.codec_ctx.send_next(object);

        while let Some(object) = self.codec_ctx.next_queued() {
            if let Err(reason) = self.check_can_send(io, false) {
                self.send_failed(io, object, reason);
                while let Some(object) = self.codec_ctx.next_queued() {
                    self.send_failed(io, object, reason);
                }
                break;
            }

            let header_bits = io.config.header_bits();
            io.write_stream.reset(self.mtu, header_bits);

            let packed = self.codec.pack(&mut io.write_stream, &object, &mut self.codec_ctx);

            if self.codec_ctx.take_rejected() {
                io.raise(SocketEvent::ObjectRejected { connection: self.handle.clone(), object });
                continue;
            }
            if !packed {
                self.send_failed(io, object, SendFailReason::CodecDeclined);
                continue;
            }
            if io.write_stream.is_overflowing() && !io.config.allow_packet_overflow {
                error!("stream to {} is overflowing, not sending", self.remote());
                self.send_failed(io, object, SendFailReason::StreamOverflow);
                continue;
            }

            let payload_bits = io.write_stream.position()
                .min(io.write_stream.capacity_bytes() * 8)
                .saturating_sub(header_bits);
            let header = self.make_header(io, true, payload_bits);

            match self.transmit(io, &header, self.always_send_mtu) {
                Ok(()) => {
                    self.track(io, &header, Some(object));
                    self.stats.packets_sent += 1;
                }
                Err(e) => {
                    log_debug!(io.log, "failed to send object to {}: {}", self.remote(), e);
                    self.track(io, &header, None);
                    self.send_failed(io, object, SendFailReason::SocketError);
                }
            }
        }
    }

    pub(crate) fn send_command(&mut self, io: &mut NetworkIo<C::Object>, command: CommandType) {
        if self.check_can_send(io, true).is_err() {
            return;
        }

        io.write_stream.reset(self.mtu, io.config.header_bits());
        io.write_stream.write_u8(command.into(), 8);

        let header = self.make_header(io, false, 8);
        if let Err(e) = self.transmit(io, &header, false) {
            log_debug!(io.log, "failed to send {:?} to {}: {}", command, self.remote(), e);
        }
        self.track(io, &header, None);
        self.stats.commands_sent += 1;
    }

    /// application requested disconnect
    pub fn disconnect(&mut self, io: &mut NetworkIo<C::Object>) {
        if self.state == ConnectionState::Connected {
            self.send_command(io, CommandType::Disconnected);
            self.change_state(io, ConnectionState::Disconnected);
        }
    }

    pub fn set_option(&mut self, config: &RudpConfig, option: ConnectionOption) {
        match option {
            ConnectionOption::Mtu(mtu) => self.mtu = mtu.clamp(config.mtu_min, config.mtu_max),
            ConnectionOption::AlwaysSendMtu(value) => self.always_send_mtu = value,
        }
    }

    fn send_connect_request(&mut self, io: &mut NetworkIo<C::Object>) -> bool {
        if self.connect_attempts >= io.config.connect_request_attempts {
            return false;
        }

        self.send_command(io, CommandType::Connect);
        self.connect_timeout = io.now + io.config.connect_request_timeout;
        self.connect_attempts += 1;
        true
    }

    pub fn process_connecting_timeouts(&mut self, io: &mut NetworkIo<C::Object>) {
        if self.state != ConnectionState::Connecting || !self.is_initiator() {
            return;
        }
        if io.now >= self.connect_timeout && !self.send_connect_request(io) {
            log_debug!(io.log, "giving up connecting to {} after {} attempts", self.remote(), self.connect_attempts);
            io.raise(SocketEvent::ConnectFailed { end_point: self.remote() });
            self.change_state(io, ConnectionState::Destroy);
        }
    }

    pub fn process_connected_timeouts(&mut self, io: &mut NetworkIo<C::Object>) {
        if self.recv_time + io.config.connection_timeout < io.now {
            log_debug!(io.log, "disconnecting due to timeout from {}, recv time: {}, now: {}", self.remote(), self.recv_time, io.now);
            self.change_state(io, ConnectionState::Disconnected);
        }

        if self.state == ConnectionState::Connected
            && (self.send_time + io.config.ping_timeout < io.now || self.recv_since_last_send >= io.config.recv_without_ack_limit)
        {
            self.send_command(io, CommandType::Ping);
        }
    }
}
