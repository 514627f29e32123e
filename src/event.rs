use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use parking_lot::Mutex;
use crate::connection::{ConnectionHandle, ConnectionShared};
use crate::end_point::EndPoint;

/// Numeric tags of all events that cross the boundary between the application and the network
///  thread. Internal commands (application to network thread) have even tags, public events
///  (network thread to application) have odd tags.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum EventTag {
    ConnectRequest = 1,
    ConnectFailed = 3,
    ConnectRefused = 5,
    Connected = 7,
    Disconnected = 9,
    ObjectSendFailed = 11,
    ObjectRejected = 13,
    ObjectDelivered = 15,
    ObjectLost = 17,
    ObjectReceived = 19,

    Start = 2,
    Connect = 4,
    Accept = 6,
    Refuse = 8,
    Disconnect = 10,
    Close = 12,
    Send = 14,
    ConnectionOption = 16,
}

impl EventTag {
    pub fn is_internal(self) -> bool {
        u8::from(self) & 1 == 0
    }

    pub fn is_public(self) -> bool {
        !self.is_internal()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SendFailReason {
    /// the packed object did not fit into the connection's MTU
    StreamOverflow,
    NotConnected,
    PacketWindowFull,
    /// the platform failed to send the datagram
    SocketError,
    /// the codec returned `false` from `pack`
    CodecDeclined,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectionOption {
    /// clamped to the configured MTU bounds
    Mtu(usize),
    /// pad every object packet to the full MTU
    AlwaysSendMtu(bool),
}

/// Notifications from the network thread to the application, see [crate::socket::Socket::poll]
pub enum SocketEvent<T> {
    /// An unconnected peer asked to connect, and the socket does not auto-accept. Answer with
    ///  [crate::socket::Socket::accept] or [crate::socket::Socket::refuse].
    ConnectRequest { end_point: EndPoint },
    /// all connect attempts timed out
    ConnectFailed { end_point: EndPoint },
    ConnectRefused { end_point: EndPoint },
    Connected { connection: ConnectionHandle<T> },
    Disconnected { connection: ConnectionHandle<T> },
    ObjectSendFailed { connection: ConnectionHandle<T>, object: T, reason: SendFailReason },
    ObjectRejected { connection: ConnectionHandle<T>, object: T },
    ObjectDelivered { connection: ConnectionHandle<T>, object: T },
    ObjectLost { connection: ConnectionHandle<T>, object: T },
    ObjectReceived { connection: ConnectionHandle<T>, object: T },
}

impl<T> SocketEvent<T> {
    pub fn tag(&self) -> EventTag {
        match self {
            SocketEvent::ConnectRequest { .. } => EventTag::ConnectRequest,
            SocketEvent::ConnectFailed { .. } => EventTag::ConnectFailed,
            SocketEvent::ConnectRefused { .. } => EventTag::ConnectRefused,
            SocketEvent::Connected { .. } => EventTag::Connected,
            SocketEvent::Disconnected { .. } => EventTag::Disconnected,
            SocketEvent::ObjectSendFailed { .. } => EventTag::ObjectSendFailed,
            SocketEvent::ObjectRejected { .. } => EventTag::ObjectRejected,
            SocketEvent::ObjectDelivered { .. } => EventTag::ObjectDelivered,
            SocketEvent::ObjectLost { .. } => EventTag::ObjectLost,
            SocketEvent::ObjectReceived { .. } => EventTag::ObjectReceived,
        }
    }

    /// the connection this event refers to, if any
    pub fn connection(&self) -> Option<&ConnectionHandle<T>> {
        match self {
            SocketEvent::ConnectRequest { .. } |
            SocketEvent::ConnectFailed { .. } |
            SocketEvent::ConnectRefused { .. } => None,
            SocketEvent::Connected { connection } |
            SocketEvent::Disconnected { connection } |
            SocketEvent::ObjectSendFailed { connection, .. } |
            SocketEvent::ObjectRejected { connection, .. } |
            SocketEvent::ObjectDelivered { connection, .. } |
            SocketEvent::ObjectLost { connection, .. } |
            SocketEvent::ObjectReceived { connection, .. } => Some(connection),
        }
    }
}

impl<T: Debug> Debug for SocketEvent<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketEvent::ConnectRequest { end_point } |
            SocketEvent::ConnectFailed { end_point } |
            SocketEvent::ConnectRefused { end_point } => write!(f, "{:?}{{{:?}}}", self.tag(), end_point),
            SocketEvent::Connected { connection } |
            SocketEvent::Disconnected { connection } => write!(f, "{:?}{{{:?}}}", self.tag(), connection),
            SocketEvent::ObjectSendFailed { connection, object, reason } => write!(f, "{:?}{{{:?}: {:?} - {:?}}}", self.tag(), connection, object, reason),
            SocketEvent::ObjectRejected { connection, object } |
            SocketEvent::ObjectDelivered { connection, object } |
            SocketEvent::ObjectLost { connection, object } |
            SocketEvent::ObjectReceived { connection, object } => write!(f, "{:?}{{{:?}: {:?}}}", self.tag(), connection, object),
        }
    }
}

/// Requests from the application to the network thread. They carry a connection's shared part
///  rather than its handle so that queued commands never keep the socket's queues alive.
pub(crate) enum Command<T> {
    Start { end_point: EndPoint },
    Connect { end_point: EndPoint },
    Accept { end_point: EndPoint },
    Refuse { end_point: EndPoint },
    Disconnect { connection: Arc<ConnectionShared> },
    Close,
    Send { connection: Arc<ConnectionShared>, object: T },
    ConnectionOption { connection: Arc<ConnectionShared>, option: ConnectionOption },
}

impl<T> Command<T> {
    pub fn tag(&self) -> EventTag {
        match self {
            Command::Start { .. } => EventTag::Start,
            Command::Connect { .. } => EventTag::Connect,
            Command::Accept { .. } => EventTag::Accept,
            Command::Refuse { .. } => EventTag::Refuse,
            Command::Disconnect { .. } => EventTag::Disconnect,
            Command::Close => EventTag::Close,
            Command::Send { .. } => EventTag::Send,
            Command::ConnectionOption { .. } => EventTag::ConnectionOption,
        }
    }
}

/// A lock-guarded FIFO, used for both directions between application and network thread.
///  The lock is only ever held for a single push or pop.
pub(crate) struct EventQueue<E> {
    queue: Mutex<VecDeque<E>>,
}

impl<E> EventQueue<E> {
    pub fn with_capacity(capacity: usize) -> EventQueue<E> {
        EventQueue {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn push(&self, event: E) {
        self.queue.lock().push_back(event);
    }

    pub fn pop(&self) -> Option<E> {
        self.queue.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn clear(&self) {
        // move the events out of the lock before dropping them
        let drained = std::mem::take(&mut *self.queue.lock());
        drop(drained);
    }
}

pub(crate) type CommandQueue<T> = EventQueue<Command<T>>;


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::connect_request(EventTag::ConnectRequest)]
    #[case::connect_failed(EventTag::ConnectFailed)]
    #[case::connect_refused(EventTag::ConnectRefused)]
    #[case::connected(EventTag::Connected)]
    #[case::disconnected(EventTag::Disconnected)]
    #[case::send_failed(EventTag::ObjectSendFailed)]
    #[case::rejected(EventTag::ObjectRejected)]
    #[case::delivered(EventTag::ObjectDelivered)]
    #[case::lost(EventTag::ObjectLost)]
    #[case::received(EventTag::ObjectReceived)]
    fn test_public_tags_are_odd(#[case] tag: EventTag) {
        assert!(tag.is_public());
        assert!(!tag.is_internal());
        assert_eq!(u8::from(tag) & 1, 1);
    }

    #[rstest]
    #[case::start(EventTag::Start)]
    #[case::connect(EventTag::Connect)]
    #[case::accept(EventTag::Accept)]
    #[case::refuse(EventTag::Refuse)]
    #[case::disconnect(EventTag::Disconnect)]
    #[case::close(EventTag::Close)]
    #[case::send(EventTag::Send)]
    #[case::option(EventTag::ConnectionOption)]
    fn test_internal_tags_are_even(#[case] tag: EventTag) {
        assert!(tag.is_internal());
        assert!(!tag.is_public());
    }

    #[test]
    fn test_tag_from_primitive() {
        assert_eq!(EventTag::try_from(7u8).unwrap(), EventTag::Connected);
        assert_eq!(EventTag::try_from(14u8).unwrap(), EventTag::Send);
        assert!(EventTag::try_from(0u8).is_err());
        assert!(EventTag::try_from(20u8).is_err());
    }

    #[test]
    fn test_command_tags() {
        let commands: Vec<Command<()>> = vec![
            Command::Start { end_point: EndPoint::ANY },
            Command::Connect { end_point: EndPoint::ANY },
            Command::Accept { end_point: EndPoint::ANY },
            Command::Refuse { end_point: EndPoint::ANY },
            Command::Close,
        ];
        for cmd in commands {
            assert!(cmd.tag().is_internal());
        }
    }

    #[test]
    fn test_event_tags() {
        let ev: SocketEvent<()> = SocketEvent::ConnectFailed { end_point: EndPoint::localhost(1) };
        assert_eq!(ev.tag(), EventTag::ConnectFailed);
        assert!(ev.connection().is_none());
        assert_eq!(format!("{:?}", ev), "ConnectFailed{127.0.0.1:1}");
    }

    #[test]
    fn test_queue_is_fifo() {
        let queue = EventQueue::with_capacity(4);
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        queue.clear();
        assert_eq!(queue.pop(), None);
    }
}
