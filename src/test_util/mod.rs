//! Utilities for testing code on top of reliable UDP sockets without real network I/O. They are
//!  used by this crate's own tests, and they are exported for application testing.

mod memory_network;

pub use memory_network::{MemoryNetwork, MemoryPlatform};
