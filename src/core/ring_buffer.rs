//! Growable circular byte buffer
//!
//! Dipakai untuk dua arah I/O per connection (input dan output).
//!
//! - Cursor `r` dan `w` adalah counter monoton (wrapping), bukan offset fisik
//! - Offset fisik = `cursor & mask`, karena itu capacity HARUS power of 2
//! - Transfer yang melewati batas wrap memakai dua segmen (readv/writev)

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

use crate::error::{Error, Result};

pub const KIB: usize = 1 << 10;
pub const MIB: usize = 1 << 20;

/// Default capacity: 64 KiB
pub const DEFAULT_CAPACITY: usize = 64 * KIB;
/// Hard ceiling: 512 MiB
pub const MAX_CAPACITY: usize = 512 * MIB;

/// Round `n` up to the next power of two, clamped to [`MAX_CAPACITY`].
///
/// `0` maps to [`DEFAULT_CAPACITY`].
#[inline]
pub fn adjust_capacity(n: usize) -> usize {
    if n == 0 {
        return DEFAULT_CAPACITY;
    }
    if n >= MAX_CAPACITY {
        return MAX_CAPACITY;
    }
    n.next_power_of_two()
}

/// Growable byte ring buffer
///
/// Invariant: `0 <= w - r <= capacity <= limit`. Growth reallocates and
/// moves all unread bytes to offset 0, so the mask stays valid.
pub struct RingBuffer {
    buf: Box<[u8]>,
    r: usize,
    w: usize,
    mask: usize,
    /// Ceiling untuk growth, power of 2
    limit: usize,
}

impl Default for RingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("limit", &self.limit)
            .finish()
    }
}

impl RingBuffer {
    /// Ring buffer dengan capacity default (64 KiB)
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Membuat ring buffer; capacity dibulatkan ke power of 2 berikutnya
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_limit(capacity, MAX_CAPACITY)
    }

    /// Ring buffer yang tidak pernah tumbuh melewati `limit`.
    ///
    /// Kedua nilai dibulatkan ke power of 2; `capacity` di-clamp ke `limit`.
    pub fn with_limit(capacity: usize, limit: usize) -> Self {
        let limit = adjust_capacity(limit);
        let capacity = adjust_capacity(capacity).min(limit);
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            r: 0,
            w: 0,
            mask: capacity - 1,
            limit,
        }
    }

    /// Jumlah bytes yang bisa dibaca
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.w.wrapping_sub(self.r)
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.w == self.r
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Growth ceiling
    #[inline(always)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline(always)]
    fn writable(&self) -> usize {
        self.capacity() - self.len()
    }

    #[inline(always)]
    fn is_full(&self) -> bool {
        self.writable() == 0
    }

    #[inline(always)]
    fn index(&self, cursor: usize) -> usize {
        cursor & self.mask
    }

    /// Zero-copy view of the readable window as (head, tail).
    ///
    /// `tail` is non-empty only when the data wraps around.
    pub fn as_slices(&self) -> (&[u8], &[u8]) {
        if self.is_empty() {
            return (&[], &[]);
        }
        let (ri, wi) = (self.index(self.r), self.index(self.w));
        if ri < wi {
            (&self.buf[ri..wi], &[])
        } else {
            (&self.buf[ri..], &self.buf[..wi])
        }
    }

    /// Materialisasi seluruh data yang bisa dibaca (handle wrap)
    pub fn bytes(&self) -> Vec<u8> {
        let (head, tail) = self.as_slices();
        let mut out = Vec::with_capacity(head.len() + tail.len());
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        out
    }

    /// Advance read cursor by up to `n` bytes (clamped, never past `w`)
    #[inline]
    pub fn release(&mut self, n: usize) {
        let n = n.min(self.len());
        self.r = self.r.wrapping_add(n);
    }

    /// Reset cursors; allocation is kept for reuse
    pub fn clear(&mut self) {
        self.r = 0;
        self.w = 0;
    }

    /// Read up to `out.len()` bytes. Returns 0 when empty.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let (head, tail) = self.as_slices();
        let n = head.len().min(out.len());
        out[..n].copy_from_slice(&head[..n]);
        let m = tail.len().min(out.len() - n);
        out[n..n + m].copy_from_slice(&tail[..m]);

        self.r = self.r.wrapping_add(n + m);
        n + m
    }

    /// Write all of `data`, growing the buffer if needed.
    ///
    /// At the capacity ceiling nothing is written and
    /// [`Error::BufferExhausted`] is returned.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        if data.len() > self.writable() {
            if !self.grow(self.len() + data.len()) {
                return Err(Error::BufferExhausted {
                    capacity: self.capacity(),
                });
            }
        }

        let wi = self.index(self.w);
        let first = data.len().min(self.capacity() - wi);
        self.buf[wi..wi + first].copy_from_slice(&data[..first]);
        // Sisa data masuk ke awal buffer (wrap)
        let rest = data.len() - first;
        self.buf[..rest].copy_from_slice(&data[first..]);

        self.w = self.w.wrapping_add(data.len());
        Ok(data.len())
    }

    /// Fill the buffer from `src` with a single vectored read.
    ///
    /// A full buffer grows first; at the ceiling this fails with
    /// [`Error::BufferExhausted`] without touching `src`. `Ok(0)` means end of stream.
    /// Errors from `src` (including `WouldBlock`) come back as [`Error::Io`].
    pub fn copy_from<R: Read + ?Sized>(&mut self, src: &mut R) -> Result<usize> {
        if self.is_full() && !self.grow(self.capacity() + 1) {
            return Err(Error::BufferExhausted {
                capacity: self.capacity(),
            });
        }

        let (wi, ri) = (self.index(self.w), self.index(self.r));
        let n = if wi < ri {
            src.read(&mut self.buf[wi..ri])?
        } else {
            // [wi..cap) lalu [0..ri)
            let (front, back) = self.buf.split_at_mut(wi);
            let mut segments = [IoSliceMut::new(back), IoSliceMut::new(&mut front[..ri])];
            src.read_vectored(&mut segments)?
        };

        self.w = self.w.wrapping_add(n);
        Ok(n)
    }

    /// Drain the buffer into `dst` with a single vectored write.
    ///
    /// Returns `Ok(0)` when the buffer is empty.
    pub fn write_to<W: Write + ?Sized>(&mut self, dst: &mut W) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let n = {
            let (head, tail) = self.as_slices();
            if tail.is_empty() {
                dst.write(head)?
            } else {
                let segments = [IoSlice::new(head), IoSlice::new(tail)];
                dst.write_vectored(&segments)?
            }
        };

        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "failed to write ring buffer").into());
        }

        self.r = self.r.wrapping_add(n);
        Ok(n)
    }

    /// Reallocate to hold at least `need` bytes, at least doubling.
    /// False jika `need` melewati limit.
    fn grow(&mut self, need: usize) -> bool {
        if need > self.limit {
            return false;
        }

        let capacity = adjust_capacity(need.max(self.capacity() * 2)).min(self.limit);
        let mut buf = vec![0u8; capacity].into_boxed_slice();
        let len = {
            let (head, tail) = self.as_slices();
            buf[..head.len()].copy_from_slice(head);
            buf[head.len()..head.len() + tail.len()].copy_from_slice(tail);
            head.len() + tail.len()
        };

        self.buf = buf;
        self.mask = capacity - 1;
        self.r = 0;
        self.w = len;
        true
    }
}
