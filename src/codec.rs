use std::collections::VecDeque;
use bytes::Bytes;
use tracing::debug;
use crate::bit_stream::BitStream;

/// Application-supplied serialization of payload objects. Each connection gets its own codec
///  instance (created by the socket's codec factory), and it is only ever used on the socket's
///  network thread.
///
/// The protocol engine treats payload objects as opaque: it hands them to the codec for packing,
///  keeps them until they are acknowledged or lost, and hands them back to the application in
///  the corresponding events.
pub trait MessageCodec: Send + 'static {
    type Object: Send + 'static;

    /// Writes `obj` to `stream`, which is positioned after the packet header. Returning `false`
    ///  means the codec declined to send the object, and the application gets an
    ///  [crate::event::SocketEvent::ObjectSendFailed] for it.
    ///
    /// Writing more than the connection's MTU is possible, but the packet is then either
    ///  rejected or truncated, see [crate::config::RudpConfig::allow_packet_overflow].
    fn pack(&mut self, stream: &mut BitStream, obj: &Self::Object, ctx: &mut CodecContext<Self::Object>) -> bool;

    /// Reads an object from a received packet's payload. `None` drops the packet's payload
    ///  silently (the packet still counts as received for acknowledgement purposes).
    fn unpack(&mut self, stream: &mut BitStream) -> Option<Self::Object>;
}

/// Gives a codec control over the send process beyond packing a single object
pub struct CodecContext<T> {
    send_next: VecDeque<T>,
    rejected: bool,
}

impl<T> Default for CodecContext<T> {
    fn default() -> Self {
        CodecContext {
            send_next: VecDeque::new(),
            rejected: false,
        }
    }
}

impl<T> CodecContext<T> {
    /// Queues an object to be sent in a separate packet right after the current one. This allows
    ///  a codec to split a logical message into several datagrams.
    pub fn send_next(&mut self, obj: T) {
        self.send_next.push_back(obj);
    }

    /// Rejects the object that is currently being packed: it is not sent, and the application
    ///  gets it back in a [crate::event::SocketEvent::ObjectRejected] event
    pub fn reject(&mut self) {
        self.rejected = true;
    }

    pub(crate) fn take_rejected(&mut self) -> bool {
        std::mem::take(&mut self.rejected)
    }

    pub(crate) fn next_queued(&mut self) -> Option<T> {
        self.send_next.pop_front()
    }

    pub fn has_queued(&self) -> bool {
        !self.send_next.is_empty()
    }
}


/// Codec for raw byte payloads: a 16 bit length prefix followed by the bytes
#[derive(Default, Clone, Debug)]
pub struct BytesCodec;

impl MessageCodec for BytesCodec {
    type Object = Bytes;

    fn pack(&mut self, stream: &mut BitStream, obj: &Bytes, _ctx: &mut CodecContext<Bytes>) -> bool {
        let Ok(len) = u16::try_from(obj.len()) else {
            debug!("payload of {} bytes is too big for a 16 bit length prefix", obj.len());
            return false;
        };

        stream.write_u16(len, 16);
        stream.write_bytes(obj);
        true
    }

    fn unpack(&mut self, stream: &mut BitStream) -> Option<Bytes> {
        if !stream.can_read(16) {
            return None;
        }
        let len = stream.read_u16(16) as usize;
        if !stream.can_read(len * 8) {
            debug!("truncated payload: announced {} bytes, {} bits remaining", len, stream.remaining_bits());
            return None;
        }

        let mut buf = vec![0u8; len];
        stream.read_bytes(&mut buf);
        Some(Bytes::from(buf))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::empty(b"")]
    #[case::short(b"hello")]
    #[case::binary(&[0u8, 255, 1, 254])]
    fn test_bytes_codec(#[case] payload: &[u8]) {
        let mut codec = BytesCodec;
        let mut ctx = CodecContext::default();
        let mut stream = BitStream::with_capacity(64);
        stream.write_u8(0, 3);

        assert!(codec.pack(&mut stream, &Bytes::copy_from_slice(payload), &mut ctx));
        let end = stream.position();
        assert!(!ctx.has_queued());

        stream.set_position(3);
        stream.set_length_bits(end);
        assert_eq!(codec.unpack(&mut stream).unwrap(), Bytes::copy_from_slice(payload));
    }

    #[test]
    fn test_bytes_codec_too_big() {
        let mut stream = BitStream::with_capacity(16);
        let obj = Bytes::from(vec![0u8; 70_000]);
        assert!(!BytesCodec.pack(&mut stream, &obj, &mut CodecContext::default()));
    }

    #[test]
    fn test_bytes_codec_truncated() {
        let mut stream = BitStream::with_capacity(16);
        stream.write_u16(10, 16);
        stream.write_bytes(&[1, 2, 3]);
        stream.set_length_bits(stream.position());
        stream.set_position(0);
        assert!(BytesCodec.unpack(&mut stream).is_none());
    }

    #[test]
    fn test_context() {
        let mut ctx = CodecContext::default();
        assert!(!ctx.take_rejected());
        ctx.reject();
        assert!(ctx.take_rejected());
        assert!(!ctx.take_rejected());

        ctx.send_next(1);
        ctx.send_next(2);
        assert!(ctx.has_queued());
        assert_eq!(ctx.next_queued(), Some(1));
        assert_eq!(ctx.next_queued(), Some(2));
        assert_eq!(ctx.next_queued(), None);
    }
}
