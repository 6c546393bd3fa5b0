//! Protocol Layer: codec framing bawaan
//!
//! - `LengthFieldCodec`: header 12 byte + payload dengan checksum
//! - `FixedLengthCodec`: setiap n bytes satu pesan

mod fixed_length;
mod length_field;

pub use fixed_length::FixedLengthCodec;
pub use length_field::{
    checksum, FrameHeader, LengthFieldCodec, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC, VERSION,
};
