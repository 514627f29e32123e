use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;
use tracing::error;
use crate::codec::MessageCodec;
use crate::config::RudpConfig;
use crate::end_point::EndPoint;
use crate::event::{Command, CommandQueue, EventQueue, SocketEvent};
use crate::logging::LogSink;
use crate::network_loop::NetworkLoop;
use crate::platform::Platform;

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum SocketState {
    Created = 1,
    Running = 2,
    Shutdown = 3,
}

/// State shared between a [Socket] and its [NetworkLoop]
pub(crate) struct SocketShared<T> {
    pub commands: Arc<CommandQueue<T>>,
    pub events: Arc<EventQueue<SocketEvent<T>>>,
    state: AtomicU8,
    stop_requested: AtomicBool,
    connection_count: AtomicUsize,
    local_end_point: Mutex<Option<EndPoint>>,
}

impl<T> SocketShared<T> {
    fn new(config: &RudpConfig) -> SocketShared<T> {
        SocketShared {
            commands: Arc::new(CommandQueue::with_capacity(config.initial_event_queue_size)),
            events: Arc::new(EventQueue::with_capacity(config.initial_event_queue_size)),
            state: AtomicU8::new(SocketState::Created.into()),
            stop_requested: AtomicBool::new(false),
            connection_count: AtomicUsize::new(0),
            local_end_point: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SocketState {
        SocketState::try_from(self.state.load(Ordering::Acquire))
            .unwrap_or(SocketState::Shutdown)
    }

    pub fn set_state(&self, state: SocketState) {
        self.state.store(state.into(), Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn set_connection_count(&self, count: usize) {
        self.connection_count.store(count, Ordering::Release);
    }

    pub fn set_local_end_point(&self, end_point: Option<EndPoint>) {
        *self.local_end_point.lock() = end_point;
    }
}

/// The application's side of a reliable UDP socket.
///
/// All operations are asynchronous: they queue a command for the network thread and return
///  immediately. Results arrive as [SocketEvent]s, which the application picks up by calling
///  [Socket::poll] - typically once or a few times per frame.
///
/// Dropping the socket stops the network thread and waits for it to finish.
pub struct Socket<C: MessageCodec> {
    shared: Arc<SocketShared<C::Object>>,
    config: RudpConfig,
    log: LogSink,
    network_thread: Option<JoinHandle<()>>,
}

impl<C: MessageCodec> Socket<C> {
    /// Creates the socket and starts its network thread. The codec factory is called once per
    ///  connection.
    pub fn new(platform: impl Platform, codec_factory: impl Fn() -> C + Send + 'static, config: &RudpConfig, log: LogSink) -> anyhow::Result<Socket<C>> {
        let (mut socket, network_loop) = Self::new_detached(platform, codec_factory, config, log)?;

        let network_thread = thread::Builder::new()
            .name("rudp-network".to_string())
            .spawn(move || network_loop.run())?;
        socket.network_thread = Some(network_thread);

        Ok(socket)
    }

    /// Creates the socket without a network thread. The caller drives the returned
    ///  [NetworkLoop] by calling [NetworkLoop::tick], which allows deterministic tests and
    ///  integration into an existing game loop.
    pub fn new_detached(platform: impl Platform, codec_factory: impl Fn() -> C + Send + 'static, config: &RudpConfig, log: LogSink) -> anyhow::Result<(Socket<C>, NetworkLoop<C>)> {
        config.validate()?;

        let shared = Arc::new(SocketShared::new(config));
        let network_loop = NetworkLoop::new(Box::new(platform), Box::new(codec_factory), config.clone(), log.clone(), shared.clone());

        let socket = Socket {
            shared,
            config: config.clone(),
            log,
            network_thread: None,
        };
        Ok((socket, network_loop))
    }

    pub fn config(&self) -> &RudpConfig {
        &self.config
    }

    pub fn log(&self) -> &LogSink {
        &self.log
    }

    pub fn state(&self) -> SocketState {
        self.shared.state()
    }

    /// the end point the socket is bound to, once it is running
    pub fn local_end_point(&self) -> Option<EndPoint> {
        *self.shared.local_end_point.lock()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connection_count.load(Ordering::Acquire)
    }

    /// Binds the socket. Binding failures are logged, and the socket stays in
    ///  [SocketState::Created] so that starting can be retried.
    pub fn start(&self, end_point: EndPoint) {
        self.shared.commands.push(Command::Start { end_point });
    }

    /// Initiates a connection. The outcome is reported as [SocketEvent::Connected],
    ///  [SocketEvent::ConnectRefused] or [SocketEvent::ConnectFailed].
    pub fn connect(&self, end_point: EndPoint) {
        self.shared.commands.push(Command::Connect { end_point });
    }

    /// accepts a peer that was reported through [SocketEvent::ConnectRequest]
    pub fn accept(&self, end_point: EndPoint) {
        self.shared.commands.push(Command::Accept { end_point });
    }

    pub fn refuse(&self, end_point: EndPoint) {
        self.shared.commands.push(Command::Refuse { end_point });
    }

    pub fn close(&self) {
        self.shared.commands.push(Command::Close);
    }

    /// Returns the oldest unprocessed event, if any. This never blocks.
    pub fn poll(&self) -> Option<SocketEvent<C::Object>> {
        self.shared.events.pop()
    }
}

impl<C: MessageCodec> Drop for Socket<C> {
    fn drop(&mut self) {
        self.shared.request_stop();
        if let Some(network_thread) = self.network_thread.take() {
            if network_thread.join().is_err() {
                error!("network thread panicked");
            }
        }
        self.shared.commands.clear();
        self.shared.events.clear();
    }
}
