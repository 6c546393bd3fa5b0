//! Core module: growable byte ring buffer
//!
//! Prinsip desain:
//! - Power-of-two capacity: offset fisik = cursor & mask
//! - Vectored I/O: satu syscall untuk dua segmen yang wrap
//! - Growth on demand sampai ceiling 512 MiB

mod ring_buffer;

pub use ring_buffer::{adjust_capacity, RingBuffer, DEFAULT_CAPACITY, KIB, MAX_CAPACITY, MIB};
