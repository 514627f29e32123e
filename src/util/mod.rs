pub mod half;
pub mod ring_buffer;
pub mod safe_converter;
pub mod sequence;
