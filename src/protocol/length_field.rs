//! Length-prefixed frame format
//!
//! Layout (little-endian):
//! ┌─────────────────────────────────────────────────────┐
//! │ FrameHeader (12 bytes, fixed)                       │
//! │   magic u16 | version u8 | flags u8 |               │
//! │   payload_len u32 | checksum u32                    │
//! ├─────────────────────────────────────────────────────┤
//! │ Payload (variable, default max 64KB)                │
//! └─────────────────────────────────────────────────────┘

use crate::error::{Error, Result};
use crate::session::Codec;

pub const HEADER_SIZE: usize = 12;
pub const MAGIC: u16 = 0x4352; // "CR"
pub const VERSION: u8 = 1;
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Frame header, dibaca field per field (tanpa cast pointer)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u16,
    pub version: u8,
    /// Reserved, diteruskan apa adanya
    pub flags: u8,
    pub payload_len: u32,
    pub checksum: u32,
}

impl FrameHeader {
    /// Header untuk `payload`, checksum langsung dihitung
    #[inline]
    pub fn for_payload(payload: &[u8], flags: u8) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            payload_len: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    /// Parse the first [`HEADER_SIZE`] bytes; `None` if `buf` is shorter
    #[inline]
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let raw: &[u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
        Some(Self {
            magic: u16::from_le_bytes([raw[0], raw[1]]),
            version: raw[2],
            flags: raw[3],
            payload_len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            checksum: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
        })
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2] = self.version;
        out[3] = self.flags;
        out[4..8].copy_from_slice(&self.payload_len.to_le_bytes());
        out[8..12].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    /// Total frame size (header + payload)
    #[inline(always)]
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload_len as usize
    }
}

/// Adler-style checksum (simple, fast)
#[inline]
pub fn checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for &byte in data {
        a = a.wrapping_add(byte as u32);
        b = b.wrapping_add(a);
    }

    (b << 16) | a
}

/// Codec for length-prefixed frames whose message is the raw payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthFieldCodec {
    max_payload: usize,
}

impl Default for LengthFieldCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl LengthFieldCodec {
    pub fn new() -> Self {
        Self {
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Codec<Vec<u8>> for LengthFieldCodec {
    fn encode(&self, msg: &Vec<u8>) -> Result<Vec<u8>> {
        if msg.len() > self.max_payload || msg.len() > u32::MAX as usize {
            return Err(Error::encode(format!(
                "payload of {} bytes exceeds limit {}",
                msg.len(),
                self.max_payload
            )));
        }

        let header = FrameHeader::for_payload(msg, 0);
        let mut out = Vec::with_capacity(header.total_size());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(msg);
        Ok(out)
    }

    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        let header = match FrameHeader::parse(buf) {
            Some(h) => h,
            None => return Ok(None),
        };

        // Header divalidasi sebelum menunggu payload, supaya stream rusak
        // tidak menahan buffer sampai penuh
        if header.magic != MAGIC {
            return Err(Error::decode(format!("bad magic {:#06x}", header.magic)));
        }
        if header.version != VERSION {
            return Err(Error::decode(format!("unsupported version {}", header.version)));
        }
        if header.payload_len as usize > self.max_payload {
            return Err(Error::decode(format!(
                "payload length {} exceeds limit {}",
                header.payload_len, self.max_payload
            )));
        }

        let total = header.total_size();
        if buf.len() < total {
            return Ok(None);
        }

        let payload = &buf[HEADER_SIZE..total];
        if checksum(payload) != header.checksum {
            return Err(Error::decode("checksum mismatch"));
        }

        Ok(Some((payload.to_vec(), total)))
    }
}
