use std::fmt::Debug;
use crate::bit_stream::BitStream;
use crate::config::RudpConfig;
use crate::util::safe_converter::SafeCast;
use crate::util::sequence::SequenceNumber;

/// The header at the start of every datagram:
///
/// ```ascii
/// 0: object sequence number, padded (16 bits)
///     the sequence number is shifted left by one, and the low bit is 1 for packets carrying
///      an application object and 0 for command packets
/// 16: ack sequence number, padded the same way (16 bits)
/// 32: ack history bitfield (config.ack_redundancy bits)
///     bit n is set if the packet 'ack sequence - n' was received
/// *: ack time (16 bits, only if config.calculate_network_ping)
///     milliseconds between receiving the acked packet and sending this one
/// *: payload size in bits (16 bits, only if config.write_packet_bit_size)
/// ```
///
/// The header is not self-describing: both sides must use the same header-related config.
#[derive(Clone, Copy, Eq, PartialEq, Default)]
pub struct PacketHeader {
    pub obj_sequence: SequenceNumber,
    pub ack_sequence: SequenceNumber,
    pub ack_history: u64,
    pub ack_time: u16,
    pub is_object: bool,
    pub bit_size: u16,
}
impl Debug for PacketHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HDR{{{}#{}@{}:{:x}/{}ms/{}b}}",
               if self.is_object { "OBJ" } else { "CMD" },
               self.obj_sequence,
               self.ack_sequence,
               self.ack_history,
               self.ack_time,
               self.bit_size,
        )
    }
}

impl PacketHeader {
    pub fn serialized_bits(config: &RudpConfig) -> usize {
        let ack_history_bits: usize = config.ack_redundancy.safe_cast();

        16                      // object sequence
            + 16                // ack sequence
            + ack_history_bits
            + if config.calculate_network_ping { 16 } else { 0 }
            + if config.write_packet_bit_size { 16 } else { 0 }
    }

    fn pad_sequence(&self, sequence: SequenceNumber) -> u16 {
        let padded = sequence.to_raw() << SequenceNumber::PADDING;
        if self.is_object {
            padded | ((1 << SequenceNumber::PADDING) - 1)
        }
        else {
            padded
        }
    }

    fn trim_sequence(padded: u16) -> SequenceNumber {
        SequenceNumber::from_raw(padded >> SequenceNumber::PADDING)
    }

    pub fn pack(&self, buf: &mut BitStream, config: &RudpConfig) {
        buf.write_u16(self.pad_sequence(self.obj_sequence), 16);
        buf.write_u16(self.pad_sequence(self.ack_sequence), 16);
        buf.write_u64(self.ack_history, config.ack_redundancy.safe_cast());

        if config.calculate_network_ping {
            buf.write_u16(self.ack_time, 16);
        }
        if config.write_packet_bit_size {
            buf.write_u16(self.bit_size, 16);
        }
    }

    /// Fields that are not on the wire for the given config are zero. Truncated input yields zero
    ///  bits for the missing part rather than an error: the sequence checks reject such packets.
    pub fn unpack(buf: &mut BitStream, config: &RudpConfig) -> PacketHeader {
        let padded_obj = buf.read_u16(16);
        let padded_ack = buf.read_u16(16);
        let ack_history = buf.read_u64(config.ack_redundancy.safe_cast());

        let ack_time = if config.calculate_network_ping { buf.read_u16(16) } else { 0 };
        let bit_size = if config.write_packet_bit_size { buf.read_u16(16) } else { 0 };

        PacketHeader {
            obj_sequence: Self::trim_sequence(padded_obj),
            ack_sequence: Self::trim_sequence(padded_ack),
            ack_history,
            ack_time,
            is_object: padded_obj & 1 == 1,
            bit_size,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn header(obj: u16, ack: u16, is_object: bool) -> PacketHeader {
        PacketHeader {
            obj_sequence: SequenceNumber::from_raw(obj),
            ack_sequence: SequenceNumber::from_raw(ack),
            ack_history: 0x8000_0000_0000_0005,
            ack_time: 123,
            is_object,
            bit_size: 77,
        }
    }

    #[rstest]
    #[case::object_full(header(1, 2, true), RudpConfig::default())]
    #[case::command_full(header(SequenceNumber::MASK, 0, false), RudpConfig::default())]
    #[case::minimal(header(12345, 4321, true), RudpConfig { ack_redundancy: 64, calculate_network_ping: false, write_packet_bit_size: false, ..Default::default() })]
    fn test_pack_unpack(#[case] header: PacketHeader, #[case] config: RudpConfig) {
        let mut buf = BitStream::with_capacity(64);
        header.pack(&mut buf, &config);
        assert_eq!(buf.position(), PacketHeader::serialized_bits(&config));

        buf.set_position(0);
        let actual = PacketHeader::unpack(&mut buf, &config);

        let mut expected = header;
        if !config.calculate_network_ping {
            expected.ack_time = 0;
        }
        if !config.write_packet_bit_size {
            expected.bit_size = 0;
        }
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_ack_history_is_truncated_to_redundancy() {
        let config = RudpConfig { ack_redundancy: 8, ..Default::default() };
        let mut buf = BitStream::with_capacity(64);
        header(1, 1, false).pack(&mut buf, &config);
        buf.set_position(0);
        assert_eq!(PacketHeader::unpack(&mut buf, &config).ack_history, 5);
    }

    #[rstest]
    #[case::object(true, 1)]
    #[case::command(false, 0)]
    fn test_first_bit_is_object_flag(#[case] is_object: bool, #[case] expected: u8) {
        let mut buf = BitStream::with_capacity(64);
        header(3, 9, is_object).pack(&mut buf, &RudpConfig::default());
        assert_eq!(buf.written_bytes()[0] & 1, expected);
        assert_eq!(buf.written_bytes()[0] >> 1, 3);
    }

    #[test]
    fn test_debug() {
        assert_eq!(format!("{:?}", header(5, 4, true)), "HDR{OBJ#5@4:8000000000000005/123ms/77b}");
    }
}
