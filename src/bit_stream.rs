use std::fmt::{Debug, Formatter};
use crate::util::half::{pack_half, unpack_half};

/// A saved cursor position, see [BitStream::save_position]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BitPosition(usize);

/// Fixed-capacity buffer for reading and writing values with bit granularity.
///
/// Values are packed LSB-first: the first bit written to a byte is its lowest bit, and multi-byte
///  values are written low byte first. A value that is not byte aligned spans two consecutive
///  bytes.
///
/// The stream has a *declared length* (e.g. the MTU of a connection) that can be smaller than the
///  backing buffer. Writing past the declared length is allowed (so that a header can be finalized
///  after the payload), but it marks the stream as [BitStream::is_overflowing]. Writing past the
///  backing buffer drops the bits, reading past the declared length returns zero bits - neither
///  ever panics.
pub struct BitStream {
    data: Vec<u8>,
    /// cursor, in bits
    ptr: usize,
    /// declared length, in bits
    length: usize,
}

impl Debug for BitStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BitStream{{ptr:{}, length:{}, capacity:{}}}", self.ptr, self.length, self.data.len())
    }
}

fn low_mask(bits: usize) -> u8 {
    (0xffu16 >> (8 - bits.min(8))) as u8
}

impl BitStream {
    pub fn with_capacity(capacity_bytes: usize) -> BitStream {
        BitStream {
            data: vec![0; capacity_bytes],
            ptr: 0,
            length: capacity_bytes << 3,
        }
    }

    /// A stream for reading (or overwriting) existing data
    pub fn from_bytes(bytes: &[u8]) -> BitStream {
        BitStream {
            data: bytes.to_vec(),
            ptr: 0,
            length: bytes.len() << 3,
        }
    }

    /// Prepares the stream for writing a new packet: zeroes the buffer, sets the declared length
    ///  and moves the cursor to `offset_bits`
    pub fn reset(&mut self, length_bytes: usize, offset_bits: usize) {
        self.data.fill(0);
        self.length = length_bytes << 3;
        self.ptr = offset_bits;
    }

    /// Prepares the stream for reading `received_bytes` bytes that were placed into
    ///  [BitStream::buffer_mut]
    pub fn prepare_read(&mut self, received_bytes: usize) {
        self.length = received_bytes.min(self.data.len()) << 3;
        self.ptr = 0;
    }

    pub fn capacity_bytes(&self) -> usize {
        self.data.len()
    }

    /// the entire backing buffer, for receiving datagrams into
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The bytes up to the cursor, rounded up to whole bytes and limited to the backing buffer.
    ///  This is what gets sent after a packet was written.
    pub fn written_bytes(&self) -> &[u8] {
        let len = ((self.ptr + 7) >> 3).min(self.data.len());
        &self.data[..len]
    }

    /// like [BitStream::written_bytes], but at least `min_len` bytes long (zero padded)
    pub fn padded_bytes(&self, min_len: usize) -> &[u8] {
        let len = ((self.ptr + 7) >> 3).max(min_len).min(self.data.len());
        &self.data[..len]
    }

    pub fn position(&self) -> usize {
        self.ptr
    }

    pub fn set_position(&mut self, bits: usize) {
        self.ptr = bits;
    }

    pub fn save_position(&self) -> BitPosition {
        BitPosition(self.ptr)
    }

    pub fn load_position(&mut self, position: BitPosition) {
        self.ptr = position.0;
    }

    pub fn length_bits(&self) -> usize {
        self.length
    }

    /// Sets the declared length. On a received packet, this limits the readable region.
    pub fn set_length_bits(&mut self, bits: usize) {
        self.length = bits;
    }

    pub fn can_write(&self, bits: usize) -> bool {
        self.ptr + bits <= self.length
    }

    pub fn can_read(&self, bits: usize) -> bool {
        self.ptr + bits <= self.length
    }

    pub fn remaining_bits(&self) -> usize {
        self.length.saturating_sub(self.ptr)
    }

    pub fn is_full(&self) -> bool {
        self.ptr == self.length
    }

    pub fn is_overflowing(&self) -> bool {
        self.ptr > self.length
    }

    fn byte_at(&self, idx: usize) -> u8 {
        self.data.get(idx).copied().unwrap_or(0)
    }

    fn update_byte(&mut self, idx: usize, keep_mask: u8, bits: u8) {
        if let Some(b) = self.data.get_mut(idx) {
            *b = (*b & keep_mask) | bits;
        }
    }

    /// writes up to 8 bits, preserving all neighbouring bits
    fn write_partial_byte(&mut self, value: u8, bits: usize) {
        if bits == 0 {
            return;
        }
        let value = value & low_mask(bits);

        let p = self.ptr >> 3;
        let used = self.ptr & 7;
        let free = 8 - used;

        if bits <= free {
            let keep = !(low_mask(bits) << used);
            self.update_byte(p, keep, value << used);
        }
        else {
            let overhang = bits - free;
            self.update_byte(p, low_mask(used), value << used);
            self.update_byte(p + 1, !low_mask(overhang), value >> free);
        }

        self.ptr += bits;
    }

    fn read_partial_byte(&mut self, bits: usize) -> u8 {
        if bits == 0 {
            return 0;
        }

        let p = self.ptr >> 3;
        let used = self.ptr & 7;

        let first = self.byte_at(p) >> used;
        let value = if used + bits <= 8 {
            first & low_mask(bits)
        }
        else {
            let overhang = used + bits - 8;
            let second = self.byte_at(p + 1) & low_mask(overhang);
            first | (second << (8 - used))
        };

        let available = self.remaining_bits();
        self.ptr += bits;

        if available < bits {
            value & low_mask(available)
        }
        else {
            value
        }
    }

    fn write_bits(&mut self, value: u64, bits: usize) {
        let mut remaining = bits.min(64);
        let mut value = value;
        while remaining > 0 {
            let n = remaining.min(8);
            self.write_partial_byte(value as u8, n);
            value >>= 8;
            remaining -= n;
        }
    }

    fn read_bits(&mut self, bits: usize) -> u64 {
        let mut remaining = bits.min(64);
        let mut shift = 0;
        let mut result = 0u64;
        while remaining > 0 {
            let n = remaining.min(8);
            result |= (self.read_partial_byte(n) as u64) << shift;
            shift += 8;
            remaining -= n;
        }
        result
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_partial_byte(value as u8, 1);
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_partial_byte(1) == 1
    }

    pub fn write_u8(&mut self, value: u8, bits: usize) {
        self.write_partial_byte(value, bits.min(8));
    }

    pub fn read_u8(&mut self, bits: usize) -> u8 {
        self.read_partial_byte(bits.min(8))
    }

    pub fn write_i8(&mut self, value: i8, bits: usize) {
        self.write_u8(value as u8, bits);
    }

    pub fn read_i8(&mut self, bits: usize) -> i8 {
        self.read_u8(bits) as i8
    }

    pub fn write_u16(&mut self, value: u16, bits: usize) {
        self.write_bits(value as u64, bits.min(16));
    }

    pub fn read_u16(&mut self, bits: usize) -> u16 {
        self.read_bits(bits.min(16)) as u16
    }

    pub fn write_i16(&mut self, value: i16, bits: usize) {
        self.write_u16(value as u16, bits);
    }

    pub fn read_i16(&mut self, bits: usize) -> i16 {
        self.read_u16(bits) as i16
    }

    pub fn write_u32(&mut self, value: u32, bits: usize) {
        self.write_bits(value as u64, bits.min(32));
    }

    pub fn read_u32(&mut self, bits: usize) -> u32 {
        self.read_bits(bits.min(32)) as u32
    }

    pub fn write_i32(&mut self, value: i32, bits: usize) {
        self.write_u32(value as u32, bits);
    }

    pub fn read_i32(&mut self, bits: usize) -> i32 {
        self.read_u32(bits) as i32
    }

    pub fn write_u64(&mut self, value: u64, bits: usize) {
        self.write_bits(value, bits);
    }

    pub fn read_u64(&mut self, bits: usize) -> u64 {
        self.read_bits(bits)
    }

    pub fn write_i64(&mut self, value: i64, bits: usize) {
        self.write_u64(value as u64, bits);
    }

    pub fn read_i64(&mut self, bits: usize) -> i64 {
        self.read_u64(bits) as i64
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits(), 32);
    }

    pub fn read_f32(&mut self) -> f32 {
        f32::from_bits(self.read_u32(32))
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits(), 64);
    }

    pub fn read_f64(&mut self) -> f64 {
        f64::from_bits(self.read_u64(64))
    }

    /// writes an f32 as a 16 bit IEEE half, losing precision and range
    pub fn write_half(&mut self, value: f32) {
        self.write_u16(pack_half(value), 16);
    }

    pub fn read_half(&mut self) -> f32 {
        unpack_half(self.read_u16(16))
    }

    /// writes the raw bytes without a length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_partial_byte(b, 8);
        }
    }

    /// fills `buf` with the next `buf.len()` bytes
    pub fn read_bytes(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            *b = self.read_partial_byte(8);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn mask(bits: usize) -> u64 {
        if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 }
    }

    #[test]
    fn test_u64_round_trip_all_widths() {
        let values = [0u64, 1, 0x5555_5555_5555_5555, 0xdead_beef_cafe_babe, u64::MAX];
        for offset in [0usize, 3, 7] {
            for bits in 1..=64 {
                for &v in &values {
                    let mut buf = BitStream::with_capacity(16);
                    buf.set_position(offset);
                    buf.write_u64(v, bits);
                    assert_eq!(buf.position(), offset + bits);

                    buf.set_position(offset);
                    assert_eq!(buf.read_u64(bits), v & mask(bits), "offset {}, bits {}, value {:x}", offset, bits, v);
                }
            }
        }
    }

    #[test]
    fn test_u32_round_trip_all_widths() {
        for bits in 1..=32 {
            for v in [0u32, 1, 0x1234_5678, u32::MAX] {
                let mut buf = BitStream::with_capacity(8);
                buf.write_bool(true);
                buf.write_u32(v, bits);
                buf.set_position(1);
                assert_eq!(buf.read_u32(bits), v & mask(bits) as u32, "bits {}", bits);
            }
        }
    }

    #[test]
    fn test_u16_round_trip_all_widths() {
        for bits in 1..=16 {
            for v in [0u16, 1, 0xabcd, u16::MAX] {
                let mut buf = BitStream::with_capacity(4);
                buf.write_u16(v, bits);
                buf.set_position(0);
                assert_eq!(buf.read_u16(bits), v & mask(bits) as u16, "bits {}", bits);
            }
        }
    }

    #[test]
    fn test_u8_round_trip_all_widths() {
        for bits in 1..=8 {
            for offset in 0..8 {
                for v in [0u8, 1, 0x5a, 0xff] {
                    let mut buf = BitStream::with_capacity(4);
                    buf.set_position(offset);
                    buf.write_u8(v, bits);
                    buf.set_position(offset);
                    assert_eq!(buf.read_u8(bits), v & mask(bits) as u8, "offset {}, bits {}", offset, bits);
                }
            }
        }
    }

    #[rstest]
    #[case::i8_full(8, -1i64)]
    #[case::i16_full(16, -12345)]
    #[case::i32_full(32, i32::MIN as i64)]
    #[case::i64_full(64, i64::MIN)]
    fn test_signed_round_trip(#[case] bits: usize, #[case] value: i64) {
        let mut buf = BitStream::with_capacity(16);
        match bits {
            8 => buf.write_i8(value as i8, 8),
            16 => buf.write_i16(value as i16, 16),
            32 => buf.write_i32(value as i32, 32),
            _ => buf.write_i64(value, 64),
        }
        buf.set_position(0);
        let actual = match bits {
            8 => buf.read_i8(8) as i64,
            16 => buf.read_i16(16) as i64,
            32 => buf.read_i32(32) as i64,
            _ => buf.read_i64(64),
        };
        assert_eq!(actual, value);
    }

    #[test]
    fn test_signed_narrow_is_twos_complement_truncation() {
        let mut buf = BitStream::with_capacity(4);
        buf.write_i32(-1, 5);
        buf.set_position(0);
        assert_eq!(buf.read_i32(5), 0x1f);
    }

    #[rstest]
    #[case::zero(0.0)]
    #[case::pi(std::f32::consts::PI)]
    #[case::negative(-1234.5678)]
    #[case::infinity(f32::INFINITY)]
    #[case::min_positive(f32::MIN_POSITIVE)]
    fn test_float_round_trip(#[case] value: f32) {
        let mut buf = BitStream::with_capacity(32);
        buf.write_bool(false);
        buf.write_f32(value);
        buf.write_f64(value as f64 * 3.0);
        buf.set_position(1);
        assert_eq!(buf.read_f32(), value);
        assert_eq!(buf.read_f64(), value as f64 * 3.0);
    }

    #[rstest]
    #[case::one(1.0)]
    #[case::fraction(-0.375)]
    #[case::big(1024.0)]
    fn test_half_round_trip(#[case] value: f32) {
        let mut buf = BitStream::with_capacity(4);
        buf.write_u8(0, 3);
        buf.write_half(value);
        buf.set_position(3);
        assert_eq!(buf.read_half(), value);
    }

    #[test]
    fn test_f32_layout_is_little_endian() {
        let mut buf = BitStream::with_capacity(4);
        buf.write_f32(1.0);
        assert_eq!(buf.written_bytes(), &1.0f32.to_le_bytes());
    }

    #[test]
    fn test_lsb_first_layout() {
        let mut buf = BitStream::with_capacity(4);
        buf.write_bool(true);
        buf.write_u8(0b101, 3);
        buf.write_u16(0x1ff, 9);
        assert_eq!(buf.written_bytes(), &[0b1111_1011, 0b0001_1111]);
    }

    #[test]
    fn test_straddling_write_preserves_neighbours() {
        let mut buf = BitStream::from_bytes(&[0xff, 0xff, 0xff]);
        buf.set_position(6);
        buf.write_u8(0, 5);
        assert_eq!(buf.written_bytes(), &[0b0011_1111, 0b1111_1000]);

        let mut buf = BitStream::with_capacity(3);
        buf.write_u8(0b10_1010, 6);
        buf.write_u8(0b1_0101, 5);
        buf.write_u8(0b1_1111, 5);

        buf.set_position(0);
        assert_eq!(buf.read_u8(6), 0b10_1010);
        assert_eq!(buf.read_u8(5), 0b1_0101);
        assert_eq!(buf.read_u8(5), 0b1_1111);
    }

    #[test]
    fn test_overwrite_in_the_middle() {
        let mut buf = BitStream::with_capacity(8);
        buf.write_u32(0xffff_ffff, 32);
        buf.write_u32(0xffff_ffff, 32);
        buf.set_position(20);
        buf.write_u16(0, 16);

        buf.set_position(0);
        assert_eq!(buf.read_u32(20), 0xf_ffff);
        assert_eq!(buf.read_u16(16), 0);
        assert_eq!(buf.read_u32(28), 0xfff_ffff);
    }

    #[test]
    fn test_save_and_load_position() {
        let mut buf = BitStream::with_capacity(8);
        buf.write_u8(1, 3);
        let pos = buf.save_position();
        buf.write_u16(0, 16);
        buf.write_u8(0x7f, 7);
        buf.load_position(pos);
        buf.write_u16(0xbeef, 16);

        buf.set_position(0);
        assert_eq!(buf.read_u8(3), 1);
        assert_eq!(buf.read_u16(16), 0xbeef);
        assert_eq!(buf.read_u8(7), 0x7f);
    }

    #[test]
    fn test_overflow_flag() {
        let mut buf = BitStream::with_capacity(8);
        buf.reset(2, 0);
        assert!(buf.can_write(16));
        assert!(!buf.can_write(17));

        buf.write_u16(0xffff, 16);
        assert!(buf.is_full());
        assert!(!buf.is_overflowing());

        buf.write_bool(true);
        assert!(buf.is_overflowing());
        assert_eq!(buf.written_bytes(), &[0xff, 0xff, 0x01]);
    }

    #[test]
    fn test_write_past_backing_buffer_is_dropped() {
        let mut buf = BitStream::with_capacity(1);
        buf.write_u32(0xffff_ffff, 32);
        assert!(buf.is_overflowing());
        assert_eq!(buf.position(), 32);
        assert_eq!(buf.written_bytes(), &[0xff]);
    }

    #[test]
    fn test_read_past_length_yields_zero() {
        let mut buf = BitStream::from_bytes(&[0xff, 0xff]);
        buf.set_length_bits(12);
        assert_eq!(buf.read_u8(8), 0xff);
        assert_eq!(buf.read_u8(8), 0x0f);
        assert_eq!(buf.read_u64(64), 0);
        assert_eq!(buf.position(), 80);
    }

    #[test]
    fn test_bytes() {
        let mut buf = BitStream::with_capacity(8);
        buf.write_u8(0, 4);
        buf.write_bytes(&[1, 2, 3, 250]);
        buf.set_position(4);
        let mut out = [0u8; 4];
        buf.read_bytes(&mut out);
        assert_eq!(out, [1, 2, 3, 250]);
    }

    #[test]
    fn test_reset_zeroes() {
        let mut buf = BitStream::with_capacity(4);
        buf.write_u32(u32::MAX, 32);
        buf.reset(4, 8);
        assert_eq!(buf.position(), 8);
        buf.set_position(0);
        assert_eq!(buf.read_u32(32), 0);
    }

    #[test]
    fn test_prepare_read() {
        let mut buf = BitStream::with_capacity(8);
        buf.buffer_mut()[..3].copy_from_slice(&[1, 2, 3]);
        buf.prepare_read(3);
        assert_eq!(buf.length_bits(), 24);
        assert_eq!(buf.read_u32(32), 0x03_0201);
    }

    #[rstest]
    #[case::empty(0, 0, 0)]
    #[case::partial_byte(3, 0, 1)]
    #[case::padded(9, 6, 6)]
    #[case::longer_than_min(20, 2, 3)]
    #[case::limited_to_buffer(0, 100, 8)]
    fn test_padded_bytes(#[case] bits: usize, #[case] min_len: usize, #[case] expected: usize) {
        let mut buf = BitStream::with_capacity(8);
        buf.set_position(bits);
        assert_eq!(buf.padded_bytes(min_len).len(), expected);
    }
}
