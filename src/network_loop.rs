use std::sync::Arc;
use std::thread;
use std::time::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::error;
use crate::bit_stream::BitStream;
use crate::codec::MessageCodec;
use crate::config::RudpConfig;
use crate::connection::{CommandType, Connection, ConnectionHandle, ConnectionMode, ConnectionShared, ConnectionState};
use crate::end_point::EndPoint;
use crate::event::{Command, EventQueue, SendFailReason, SocketEvent};
use crate::logging::{log_debug, log_info, log_trace, log_warn, LogSink};
use crate::packet_header::PacketHeader;
use crate::platform::{Platform, PlatformError};
use crate::socket::{SocketShared, SocketState};
use crate::util::sequence::SequenceNumber;

/// Everything a connection needs for talking to the outside world while it is being processed
pub(crate) struct NetworkIo<T> {
    pub config: RudpConfig,
    pub platform: Box<dyn Platform>,
    /// shared by all connections, each outgoing packet is assembled here
    pub write_stream: BitStream,
    pub events: Arc<EventQueue<SocketEvent<T>>>,
    pub log: LogSink,
    /// `false` once the socket is shut down
    pub socket_open: bool,
    /// platform time in millis, refreshed before each unit of work
    pub now: u64,
}

impl<T> NetworkIo<T> {
    pub fn new(config: RudpConfig, platform: Box<dyn Platform>, events: Arc<EventQueue<SocketEvent<T>>>, log: LogSink) -> NetworkIo<T> {
        let write_stream = BitStream::with_capacity(config.mtu_max * 2);
        let now = platform.precision_time_ms();
        NetworkIo {
            config,
            platform,
            write_stream,
            events,
            log,
            socket_open: true,
            now,
        }
    }

    pub fn refresh_time(&mut self) {
        self.now = self.platform.precision_time_ms();
    }

    pub fn raise(&self, event: SocketEvent<T>) {
        log_trace!(self.log, "raising {:?}", event.tag());
        self.events.push(event);
    }

    /// sends the write stream's content, zero padded to at least `min_len` bytes
    pub fn send_write_stream(&mut self, to: EndPoint, min_len: usize) -> Result<(), PlatformError> {
        if !self.socket_open {
            return Err(PlatformError::other("socket is shut down"));
        }
        let bytes = self.write_stream.padded_bytes(min_len);
        self.platform.send_to(bytes, to)?;
        Ok(())
    }
}


/// The socket's network thread: owns the platform and all connections, and does all protocol
///  work. Everything else interacts with it through the socket's command and event queues.
///
/// [Socket::new](crate::socket::Socket::new) runs the loop on a dedicated thread.
///  [Socket::new_detached](crate::socket::Socket::new_detached) hands it to the caller, who then
///  drives it by calling [NetworkLoop::tick].
pub struct NetworkLoop<C: MessageCodec> {
    io: NetworkIo<C::Object>,
    shared: Arc<SocketShared<C::Object>>,
    codec_factory: Box<dyn Fn() -> C + Send>,
    state: SocketState,

    connections: FxHashMap<EndPoint, Connection<C>>,
    /// creation order, which is the order of timeout processing
    connection_order: Vec<EndPoint>,
    /// unconnected peers that asked to connect and wait for the application's decision
    pending: FxHashSet<EndPoint>,
    next_connection_id: u64,

    read_stream: BitStream,
    loss_rng: StdRng,
    frame: u32,
}

impl<C: MessageCodec> NetworkLoop<C> {
    const RECV_POLL_TIMEOUT: Duration = Duration::from_millis(1);

    pub(crate) fn new(
        platform: Box<dyn Platform>,
        codec_factory: Box<dyn Fn() -> C + Send>,
        config: RudpConfig,
        log: LogSink,
        shared: Arc<SocketShared<C::Object>>,
    ) -> NetworkLoop<C> {
        let read_stream = BitStream::with_capacity(config.mtu_max * 2);
        let loss_rng = StdRng::seed_from_u64(config.simulated_loss_seed);
        let io = NetworkIo::new(config, platform, shared.events.clone(), log);

        NetworkLoop {
            io,
            shared,
            codec_factory,
            state: SocketState::Created,
            connections: FxHashMap::default(),
            connection_order: Vec::new(),
            pending: FxHashSet::default(),
            next_connection_id: 0,
            read_stream,
            loss_rng,
            frame: 0,
        }
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    /// Runs until the socket is closed, or until its owning [crate::socket::Socket] is dropped
    pub fn run(mut self) {
        let _log_guard = self.io.log.install();
        log_info!(self.io.log, "network thread started");

        while !self.shared.is_stop_requested() {
            match self.state {
                SocketState::Created => {
                    self.tick();
                    thread::sleep(Duration::from_millis(1));
                }
                SocketState::Running => self.tick(),
                SocketState::Shutdown => break,
            }
        }

        if self.state == SocketState::Running {
            self.shutdown();
        }
        log_info!(self.io.log, "network thread stopped");
    }

    /// A single iteration of the network loop: receive (waiting briefly for a datagram), check
    ///  timeouts on every fourth frame, and process the application's commands.
    pub fn tick(&mut self) {
        match self.state {
            SocketState::Created => self.process_commands(),
            SocketState::Running => {
                self.recv();
                if self.frame & 3 == 3 {
                    self.process_timeouts();
                }
                self.process_commands();
                self.frame = self.frame.wrapping_add(1);
            }
            SocketState::Shutdown => {}
        }
    }

    fn set_state(&mut self, state: SocketState) {
        log_debug!(self.io.log, "socket state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.io.socket_open = state != SocketState::Shutdown;
        self.shared.set_state(state);
    }

    fn shutdown(&mut self) {
        self.set_state(SocketState::Shutdown);
        if let Err(e) = self.io.platform.close() {
            error!("error closing socket: {}", e);
        }
        log_info!(self.io.log, "socket shut down");
    }

    fn simulate_loss(&mut self) -> bool {
        let loss = self.io.config.simulated_loss;
        loss > 0.0 && self.loss_rng.gen::<f32>() < loss
    }

    fn recv(&mut self) {
        if !self.io.platform.recv_poll(Self::RECV_POLL_TIMEOUT) {
            return;
        }

        match self.io.platform.recv_from(self.read_stream.buffer_mut()) {
            Ok(Some((len, from))) => {
                self.read_stream.prepare_read(len);
                self.io.refresh_time();

                if self.simulate_loss() {
                    log_trace!(self.io.log, "simulated loss of packet from {}", from);
                    return;
                }

                match self.connections.get_mut(&from) {
                    Some(conn) => {
                        conn.on_packet(&mut self.io, &mut self.read_stream);
                        conn.publish();
                    }
                    None => self.recv_unconnected(from),
                }
            }
            Ok(None) => {}
            Err(e) if e.is_would_block() => {}
            Err(e) => error!("error receiving datagram: {}", e),
        }
    }

    fn accepts_incoming(&self) -> bool {
        let count = self.connections.len() + self.pending.len();
        self.io.config.allow_incoming_connections
            && self.io.config.connection_limit.map_or(true, |limit| count < limit)
    }

    fn recv_unconnected(&mut self, from: EndPoint) {
        let header = PacketHeader::unpack(&mut self.read_stream, &self.io.config);
        if header.is_object {
            log_trace!(self.io.log, "dropping object packet from unconnected end point {}", from);
            return;
        }

        self.read_stream.set_position(self.io.config.header_bits());
        let raw = self.read_stream.read_u8(8);
        if !matches!(CommandType::try_from(raw), Ok(CommandType::Connect)) {
            log_debug!(self.io.log, "dropping command {} from unconnected end point {}", raw, from);
            return;
        }

        if self.pending.contains(&from) {
            return;
        }

        if !self.accepts_incoming() {
            log_debug!(self.io.log, "refusing connection from {}", from);
            self.send_refused(from);
        }
        else if self.io.config.auto_accept_incoming_connections {
            self.accept_connection(from);
        }
        else {
            log_debug!(self.io.log, "connect request from {}", from);
            self.pending.insert(from);
            self.io.raise(SocketEvent::ConnectRequest { end_point: from });
        }
    }

    fn send_refused(&mut self, to: EndPoint) {
        let config = &self.io.config;
        let write_stream = &mut self.io.write_stream;
        write_stream.reset(config.default_mtu, config.header_bits());
        write_stream.write_u8(CommandType::Refused.into(), 8);

        let payload_end = write_stream.save_position();
        write_stream.set_position(0);
        PacketHeader {
            obj_sequence: SequenceNumber::from_raw(1),
            ack_sequence: SequenceNumber::from_raw(1),
            bit_size: 8,
            ..Default::default()
        }.pack(write_stream, config);
        write_stream.load_position(payload_end);

        if let Err(e) = self.io.send_write_stream(to, 0) {
            log_debug!(self.io.log, "failed to send 'refused' to {}: {}", to, e);
        }
    }

    /// returns `false` if there is a connection for the end point already
    fn create_connection(&mut self, remote: EndPoint, mode: ConnectionMode) -> bool {
        if self.connections.contains_key(&remote) {
            log_warn!(self.io.log, "there is already a connection to {}", remote);
            return false;
        }

        self.next_connection_id += 1;
        let shared = Arc::new(ConnectionShared::new(self.next_connection_id, remote, mode, &self.io.config));
        let handle = ConnectionHandle::new(shared, self.shared.commands.clone());
        let conn = Connection::new(handle, mode, (self.codec_factory)(), &self.io.config, self.io.now);
        conn.publish();

        log_debug!(self.io.log, "created connection #{} to {} as {:?}", self.next_connection_id, remote, mode);
        self.connections.insert(remote, conn);
        self.connection_order.push(remote);
        self.shared.set_connection_count(self.connections.len());
        true
    }

    fn accept_connection(&mut self, remote: EndPoint) {
        if !self.create_connection(remote, ConnectionMode::Acceptor) {
            return;
        }
        if let Some(conn) = self.connections.get_mut(&remote) {
            conn.change_state(&mut self.io, ConnectionState::Connected);
            conn.publish();
        }
    }

    fn process_timeouts(&mut self) {
        self.io.refresh_time();

        let mut i = 0;
        while i < self.connection_order.len() {
            let remote = self.connection_order[i];
            let state = match self.connections.get(&remote) {
                Some(conn) => conn.state(),
                None => {
                    self.connection_order.remove(i);
                    continue;
                }
            };

            if state == ConnectionState::Destroy {
                log_debug!(self.io.log, "removing connection to {}", remote);
                self.connections.remove(&remote);
                self.connection_order.remove(i);
                self.shared.set_connection_count(self.connections.len());
                continue;
            }

            if let Some(conn) = self.connections.get_mut(&remote) {
                match state {
                    ConnectionState::Connecting => conn.process_connecting_timeouts(&mut self.io),
                    ConnectionState::Connected => conn.process_connected_timeouts(&mut self.io),
                    ConnectionState::Disconnected => conn.change_state(&mut self.io, ConnectionState::Destroy),
                    ConnectionState::None | ConnectionState::Destroy => {}
                }
                conn.publish();
            }
            i += 1;
        }
    }

    /// the network thread's connection for a shared part, unless that connection is gone
    fn lookup<'a>(connections: &'a mut FxHashMap<EndPoint, Connection<C>>, shared: &ConnectionShared) -> Option<&'a mut Connection<C>> {
        connections.get_mut(&shared.remote())
            .filter(|conn| conn.id() == shared.id())
    }

    fn process_commands(&mut self) {
        while let Some(command) = self.shared.commands.pop() {
            self.io.refresh_time();
            log_trace!(self.io.log, "processing command {:?}", command.tag());

            match command {
                Command::Start { end_point } => self.on_start(end_point),
                Command::Connect { end_point } => self.on_connect(end_point),
                Command::Accept { end_point } => {
                    if self.pending.remove(&end_point) {
                        self.accept_connection(end_point);
                    }
                    else {
                        log_warn!(self.io.log, "no pending connect request from {}", end_point);
                    }
                }
                Command::Refuse { end_point } => {
                    if self.pending.remove(&end_point) {
                        self.send_refused(end_point);
                    }
                    else {
                        log_warn!(self.io.log, "no pending connect request from {}", end_point);
                    }
                }
                Command::Disconnect { connection } => {
                    if let Some(conn) = Self::lookup(&mut self.connections, &connection) {
                        conn.disconnect(&mut self.io);
                        conn.publish();
                    }
                }
                Command::Close => {
                    if self.state == SocketState::Running {
                        self.shutdown();
                    }
                }
                Command::Send { connection, object } => {
                    match Self::lookup(&mut self.connections, &connection) {
                        Some(conn) => {
                            conn.send_object(&mut self.io, object);
                            conn.publish();
                        }
                        None => {
                            let handle = ConnectionHandle::new(connection, self.shared.commands.clone());
                            self.io.raise(SocketEvent::ObjectSendFailed { connection: handle, object, reason: SendFailReason::NotConnected });
                        }
                    }
                }
                Command::ConnectionOption { connection, option } => {
                    if let Some(conn) = Self::lookup(&mut self.connections, &connection) {
                        conn.set_option(&self.io.config, option);
                        conn.publish();
                    }
                }
            }
        }
    }

    fn on_start(&mut self, end_point: EndPoint) {
        if self.state != SocketState::Created {
            log_warn!(self.io.log, "socket was started already");
            return;
        }

        match self.io.platform.bind(end_point) {
            Ok(()) => {
                let local = self.io.platform.local_end_point();
                self.shared.set_local_end_point(local);
                self.set_state(SocketState::Running);
                log_info!(self.io.log, "socket bound to {:?}", local);
            }
            Err(e) => error!("could not bind socket to {}: {}", end_point, e),
        }
    }

    fn on_connect(&mut self, remote: EndPoint) {
        if self.state != SocketState::Running {
            log_warn!(self.io.log, "socket is not running, not connecting to {}", remote);
            return;
        }

        if !self.create_connection(remote, ConnectionMode::Initiator) {
            error!("could not create connection to {}", remote);
            return;
        }
        if let Some(conn) = self.connections.get_mut(&remote) {
            conn.process_connecting_timeouts(&mut self.io);
            conn.publish();
        }
    }
}
