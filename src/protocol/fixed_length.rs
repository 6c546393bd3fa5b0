//! Fixed-length framing: setiap `n` bytes adalah satu pesan

use crate::error::{Error, Result};
use crate::session::Codec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLengthCodec {
    frame_len: usize,
}

impl FixedLengthCodec {
    pub fn new(frame_len: usize) -> Result<Self> {
        if frame_len == 0 {
            return Err(Error::InvalidArgument("frame length must be non-zero".to_string()));
        }
        Ok(Self { frame_len })
    }

    #[inline(always)]
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}

impl Codec<Vec<u8>> for FixedLengthCodec {
    fn encode(&self, msg: &Vec<u8>) -> Result<Vec<u8>> {
        if msg.len() != self.frame_len {
            return Err(Error::encode(format!(
                "message is {} bytes, frame is {}",
                msg.len(),
                self.frame_len
            )));
        }
        Ok(msg.clone())
    }

    fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>> {
        if buf.len() < self.frame_len {
            return Ok(None);
        }
        Ok(Some((buf[..self.frame_len].to_vec(), self.frame_len)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_length_rejected() {
        assert!(matches!(FixedLengthCodec::new(0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_decode() {
        let codec = FixedLengthCodec::new(5).unwrap();
        assert_eq!(codec.decode(b"hell").unwrap(), None);
        assert_eq!(
            codec.decode(b"hellohel").unwrap(),
            Some((b"hello".to_vec(), 5))
        );
    }

    #[test]
    fn test_encode_checks_length() {
        let codec = FixedLengthCodec::new(3).unwrap();
        assert_eq!(codec.encode(&b"abc".to_vec()).unwrap(), b"abc");
        assert!(matches!(codec.encode(&b"ab".to_vec()), Err(Error::Encode(_))));
    }
}
