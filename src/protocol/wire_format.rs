//! Wire format encoding and decoding.
//!
//! Every scalar is a 32-bit Big Endian word. A request frame is laid out as:
//! ```text
//! ┌────────────────────┬──────────┬──────────┬─────┐
//! │ Request envelope   │ Arg 0    │ Arg 1    │ ... │
//! │ reserved, filled   │ uint32 BE│ uint32 BE│     │
//! │ by the transport   │          │          │     │
//! └────────────────────┴──────────┴──────────┴─────┘
//! ```
//! A reply is the transport's reply envelope followed by result words.
//!
//! Both buffers have a fixed capacity decided at allocation. Writes past
//! it and reads past the payload fail without touching the buffer.

use bytes::{Buf, BufMut};
use tracing::error;

use crate::error::{PmappError, Result};

/// Size of one wire word in bytes.
pub const WORD_SIZE: usize = 4;

/// Default transaction buffer capacity.
pub const TRANSACTION_BUFFER_SIZE: usize = 256;

fn allocate(capacity: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(capacity)
        .map_err(|_| PmappError::OutOfMemory(capacity))?;
    Ok(data)
}

/// Outgoing request buffer.
#[derive(Debug)]
pub struct TxBuffer {
    data: Vec<u8>,
    capacity: usize,
    reserved: usize,
}

impl TxBuffer {
    /// Allocate an empty buffer holding at most `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self {
            data: allocate(capacity)?,
            capacity,
            reserved: 0,
        })
    }

    /// Drop all content, including any reserved envelope.
    pub fn reset(&mut self) {
        self.data.clear();
        self.reserved = 0;
    }

    /// Skip `len` bytes at the front for the transport's request envelope.
    pub fn reserve_envelope(&mut self, len: usize) -> Result<()> {
        self.ensure_room(len)?;
        self.data.resize(self.data.len() + len, 0);
        self.reserved += len;
        Ok(())
    }

    /// Append one word in network byte order.
    pub fn put_u32(&mut self, word: u32) -> Result<()> {
        self.ensure_room(WORD_SIZE)?;
        self.data.put_u32(word);
        Ok(())
    }

    fn ensure_room(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            error!(
                capacity = self.capacity,
                used = self.data.len(),
                needed,
                "transmit buffer overflow"
            );
            return Err(PmappError::BufferOverflow {
                capacity: self.capacity,
                used: self.data.len(),
                needed,
            });
        }
        Ok(())
    }

    /// Bytes still available for arguments.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Length of the argument payload, excluding the envelope.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.data.len() - self.reserved
    }

    /// Argument bytes after the envelope.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.reserved..]
    }

    /// The whole frame, envelope included, for the transport to fill and send.
    pub fn frame_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Incoming reply buffer.
///
/// The storage is always `capacity` bytes long so a transport can write
/// straight into it; `start..end` marks the unread payload.
#[derive(Debug)]
pub struct RxBuffer {
    data: Vec<u8>,
    start: usize,
    end: usize,
}

impl RxBuffer {
    /// Allocate a zeroed receive area of `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        let mut data = allocate(capacity)?;
        data.resize(capacity, 0);
        Ok(Self {
            data,
            start: 0,
            end: 0,
        })
    }

    /// Wrap an already received payload (no envelope).
    pub fn from_payload(payload: &[u8]) -> Self {
        Self {
            data: payload.to_vec(),
            start: 0,
            end: payload.len(),
        }
    }

    pub fn reset(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Unread payload bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.end - self.start
    }

    /// Writable receive area handed to the transport.
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Mark the first `len` bytes of storage as received.
    pub fn fill(&mut self, len: usize) -> Result<()> {
        if len > self.data.len() {
            error!(capacity = self.data.len(), len, "reply larger than receive buffer");
            return Err(PmappError::BufferOverflow {
                capacity: self.data.len(),
                used: 0,
                needed: len,
            });
        }
        self.start = 0;
        self.end = len;
        Ok(())
    }

    /// Discard the transport's reply envelope.
    pub fn strip_envelope(&mut self, len: usize) -> Result<()> {
        self.ensure_available(len)?;
        self.start += len;
        Ok(())
    }

    /// Consume one network-order word from the front of the payload.
    pub fn get_u32(&mut self) -> Result<u32> {
        self.ensure_available(WORD_SIZE)?;
        let word = (&self.data[self.start..self.end]).get_u32();
        self.start += WORD_SIZE;
        Ok(word)
    }

    fn ensure_available(&self, needed: usize) -> Result<()> {
        if self.remaining() < needed {
            error!(len = self.remaining(), needed, "receive buffer underrun");
            return Err(PmappError::BufferUnderrun {
                available: self.remaining(),
                needed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_big_endian() {
        let mut tx = TxBuffer::with_capacity(8).unwrap();
        tx.put_u32(0x0102_0304).unwrap();
        assert_eq!(tx.payload(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_round_trip_exact_capacity() {
        let words = [0u32, 1, 0xDEAD_BEEF, u32::MAX, 0x3000_0060];
        let envelope = 40;
        let mut tx = TxBuffer::with_capacity(envelope + words.len() * WORD_SIZE).unwrap();
        tx.reserve_envelope(envelope).unwrap();
        for &w in &words {
            tx.put_u32(w).unwrap();
        }
        assert_eq!(tx.remaining(), 0);

        let mut rx = RxBuffer::from_payload(tx.payload());
        let decoded: Vec<u32> = (0..words.len()).map(|_| rx.get_u32().unwrap()).collect();
        assert_eq!(decoded, words);
        assert_eq!(rx.remaining(), 0);
    }

    #[test]
    fn test_overflow_leaves_length_unchanged() {
        let mut tx = TxBuffer::with_capacity(10).unwrap();
        tx.put_u32(1).unwrap();
        tx.put_u32(2).unwrap();
        let before = tx.payload_len();

        let err = tx.put_u32(3).unwrap_err();
        assert!(matches!(
            err,
            PmappError::BufferOverflow {
                capacity: 10,
                used: 8,
                needed: 4
            }
        ));
        assert_eq!(tx.payload_len(), before);
        assert_eq!(tx.payload(), &[0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn test_envelope_counts_against_capacity() {
        let mut tx = TxBuffer::with_capacity(44).unwrap();
        tx.reserve_envelope(40).unwrap();
        tx.put_u32(7).unwrap();
        assert!(tx.put_u32(8).is_err());
        assert_eq!(tx.frame_mut().len(), 44);
        assert_eq!(tx.payload_len(), 4);
    }

    #[test]
    fn test_reset_clears_envelope() {
        let mut tx = TxBuffer::with_capacity(64).unwrap();
        tx.reserve_envelope(40).unwrap();
        tx.put_u32(1).unwrap();
        tx.reset();
        assert_eq!(tx.payload_len(), 0);
        assert_eq!(tx.remaining(), 64);
    }

    #[test]
    fn test_underrun_leaves_buffer_unchanged() {
        let mut rx = RxBuffer::from_payload(&[0, 0, 0, 9, 0xAA, 0xBB]);
        assert_eq!(rx.get_u32().unwrap(), 9);
        assert_eq!(rx.remaining(), 2);

        let err = rx.get_u32().unwrap_err();
        assert!(matches!(
            err,
            PmappError::BufferUnderrun {
                available: 2,
                needed: 4
            }
        ));
        assert_eq!(rx.remaining(), 2);
    }

    #[test]
    fn test_fill_and_strip_envelope() {
        let mut rx = RxBuffer::with_capacity(32).unwrap();
        rx.storage_mut()[24..28].copy_from_slice(&0x0100u32.to_be_bytes());
        rx.fill(28).unwrap();
        rx.strip_envelope(24).unwrap();
        assert_eq!(rx.get_u32().unwrap(), 0x0100);
    }

    #[test]
    fn test_short_reply_cannot_strip_envelope() {
        let mut rx = RxBuffer::with_capacity(32).unwrap();
        rx.fill(10).unwrap();
        assert!(rx.strip_envelope(24).is_err());
        assert_eq!(rx.remaining(), 10);
    }

    #[test]
    fn test_fill_beyond_capacity() {
        let mut rx = RxBuffer::with_capacity(16).unwrap();
        assert!(matches!(
            rx.fill(17),
            Err(PmappError::BufferOverflow { .. })
        ));
    }
}
