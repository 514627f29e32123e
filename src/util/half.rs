//! Table-driven conversion between `f32` and IEEE 754 half precision (binary16), see
//!  "Fast Half Float Conversions" by Jeroen van der Zijp.
//!
//! Packing truncates the mantissa (no rounding). Values too big for half precision become
//!  infinity, values too small become (signed) zero.

use std::sync::OnceLock;

struct HalfTables {
    base: [u16; 512],
    shift: [u8; 512],
    mantissa: Vec<u32>,
    exponent: [u32; 64],
    offset: [u16; 64],
}

fn tables() -> &'static HalfTables {
    static TABLES: OnceLock<HalfTables> = OnceLock::new();
    TABLES.get_or_init(HalfTables::new)
}

impl HalfTables {
    fn new() -> HalfTables {
        let mut base = [0u16; 512];
        let mut shift = [0u8; 512];

        for i in 0..256usize {
            let e = i as i32 - 127;
            let (b, s) = if e < -24 {
                (0x0000u16, 24u8)
            }
            else if e < -14 {
                // subnormal half
                ((0x0400 >> (-e - 14)) as u16, (-e - 1) as u8)
            }
            else if e <= 15 {
                (((e + 15) << 10) as u16, 13)
            }
            else if e < 128 {
                // overflow to infinity
                (0x7c00, 24)
            }
            else {
                // infinity and NaN
                (0x7c00, 13)
            };

            base[i] = b;
            base[i | 0x100] = b | 0x8000;
            shift[i] = s;
            shift[i | 0x100] = s;
        }

        let mut mantissa = vec![0u32; 2048];
        for (i, m) in mantissa.iter_mut().enumerate().take(1024).skip(1) {
            *m = Self::convert_subnormal_mantissa(i as u32);
        }
        for (i, m) in mantissa.iter_mut().enumerate().skip(1024) {
            *m = 0x3800_0000 + (((i - 1024) as u32) << 13);
        }

        let mut exponent = [0u32; 64];
        for (i, e) in exponent.iter_mut().enumerate() {
            *e = match i {
                0 => 0,
                1..=30 => (i as u32) << 23,
                31 => 0x4780_0000,
                32 => 0x8000_0000,
                33..=62 => 0x8000_0000 + (((i - 32) as u32) << 23),
                _ => 0xc780_0000,
            };
        }

        let mut offset = [1024u16; 64];
        offset[0] = 0;
        offset[32] = 0;

        HalfTables { base, shift, mantissa, exponent, offset }
    }

    fn convert_subnormal_mantissa(i: u32) -> u32 {
        let mut m = i << 13;
        let mut e = 0u32;

        while m & 0x0080_0000 == 0 {
            e = e.wrapping_sub(0x0080_0000);
            m <<= 1;
        }
        m &= !0x0080_0000;
        e = e.wrapping_add(0x3880_0000);
        m | e
    }
}

pub fn pack_half(value: f32) -> u16 {
    let t = tables();
    let f = value.to_bits();
    let idx = ((f >> 23) & 0x1ff) as usize;
    t.base[idx] + ((f & 0x007f_ffff) >> t.shift[idx]) as u16
}

pub fn unpack_half(half: u16) -> f32 {
    let t = tables();
    let hi = (half >> 10) as usize;
    let bits = t.mantissa[t.offset[hi] as usize + (half & 0x3ff) as usize] + t.exponent[hi];
    f32::from_bits(bits)
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::zero(0.0, 0x0000)]
    #[case::neg_zero(-0.0, 0x8000)]
    #[case::one(1.0, 0x3c00)]
    #[case::neg_two(-2.0, 0xc000)]
    #[case::half(0.5, 0x3800)]
    #[case::max(65504.0, 0x7bff)]
    #[case::smallest_subnormal(5.960_464_5e-8, 0x0001)]
    #[case::infinity(f32::INFINITY, 0x7c00)]
    #[case::neg_infinity(f32::NEG_INFINITY, 0xfc00)]
    #[case::overflow(1.0e6, 0x7c00)]
    #[case::underflow(1.0e-10, 0x0000)]
    fn test_pack(#[case] value: f32, #[case] expected: u16) {
        assert_eq!(pack_half(value), expected);
    }

    #[rstest]
    #[case::zero(0x0000, 0.0)]
    #[case::one(0x3c00, 1.0)]
    #[case::neg_two(0xc000, -2.0)]
    #[case::max(0x7bff, 65504.0)]
    #[case::smallest_subnormal(0x0001, 5.960_464_5e-8)]
    #[case::largest_subnormal(0x03ff, 1023.0 / 16_777_216.0)]
    #[case::infinity(0x7c00, f32::INFINITY)]
    fn test_unpack(#[case] half: u16, #[case] expected: f32) {
        assert_eq!(unpack_half(half), expected);
    }

    #[test]
    fn test_nan() {
        assert!(unpack_half(pack_half(f32::NAN)).is_nan());
    }

    #[test]
    fn test_all_halves_survive_unpack_and_pack() {
        for h in 0..=u16::MAX {
            let f = unpack_half(h);
            if f.is_nan() {
                continue;
            }
            assert_eq!(pack_half(f), h, "half {:#06x}", h);
        }
    }
}
