//! # Audio Frame Buffer
//!
//! Holds opaque audio frames from the downstream client until the upstream
//! connection can take them. Frames are never decoded; the relay only cares
//! about their order and their total size.
//!
//! ## Key Features:
//! - **Order preserving**: a flush is the exact concatenation of the frames, in arrival order
//! - **Lossless while waiting**: nothing is flushed (or dropped) until upstream is open
//! - **Bounded**: frames that would push the buffer past its limit are rejected,
//!   so a client cannot grow memory without limit while upstream is unavailable

use crate::error::RelayError;

/// Pending audio for one relay session.
///
/// ## Rust Concepts:
/// - **Vec<Vec<u8>>**: each frame is kept as its own allocation until flush,
///   so appending never copies previously buffered audio
/// - **Option<Vec<u8>>**: a flush either yields one contiguous payload or nothing
#[derive(Debug)]
pub struct FrameBuffer {
    /// Frames in arrival order
    frames: Vec<Vec<u8>>,

    /// Sum of the frame lengths, kept alongside to avoid re-summing
    buffered_bytes: usize,

    /// Maximum number of bytes held at once
    max_bytes: usize,
}

impl FrameBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            frames: Vec::new(),
            buffered_bytes: 0,
            max_bytes,
        }
    }

    /// Append one frame.
    ///
    /// ## Behavior:
    /// - Empty frames carry no audio and are ignored
    /// - A frame that would exceed the limit is rejected as a whole; what is
    ///   already buffered stays intact
    pub fn append(&mut self, frame: Vec<u8>) -> Result<(), RelayError> {
        if frame.is_empty() {
            return Ok(());
        }

        if self.buffered_bytes + frame.len() > self.max_bytes {
            return Err(RelayError::BufferOverflow {
                buffered: self.buffered_bytes,
                incoming: frame.len(),
                limit: self.max_bytes,
            });
        }

        self.buffered_bytes += frame.len();
        self.frames.push(frame);
        Ok(())
    }

    /// Take everything buffered as one contiguous payload.
    ///
    /// Returns `None` and leaves the buffer untouched when upstream is not
    /// open or there is nothing to send.
    pub fn flush_if_ready(&mut self, upstream_open: bool) -> Option<Vec<u8>> {
        if !upstream_open || self.frames.is_empty() {
            return None;
        }

        let payload = if self.frames.len() == 1 {
            self.frames.pop().unwrap_or_default()
        } else {
            let mut payload = Vec::with_capacity(self.buffered_bytes);
            for frame in self.frames.drain(..) {
                payload.extend_from_slice(&frame);
            }
            payload
        };

        self.frames.clear();
        self.buffered_bytes = 0;
        Some(payload)
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    #[cfg(test)]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drop all pending audio (session teardown).
    pub fn clear(&mut self) {
        self.frames.clear();
        self.buffered_bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulates_until_upstream_open() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.append(vec![1; 10]).unwrap();
        buffer.append(vec![2; 20]).unwrap();
        buffer.append(vec![3; 5]).unwrap();

        assert_eq!(buffer.flush_if_ready(false), None);
        assert_eq!(buffer.buffered_bytes(), 35);
        assert_eq!(buffer.frame_count(), 3);

        let payload = buffer.flush_if_ready(true).unwrap();
        assert_eq!(payload.len(), 35);
        assert_eq!(&payload[..10], &[1; 10]);
        assert_eq!(&payload[10..30], &[2; 20]);
        assert_eq!(&payload[30..], &[3; 5]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.buffered_bytes(), 0);
    }

    #[test]
    fn test_flush_of_empty_buffer_is_none() {
        let mut buffer = FrameBuffer::new(1024);
        assert_eq!(buffer.flush_if_ready(true), None);
        buffer.append(Vec::new()).unwrap();
        assert_eq!(buffer.flush_if_ready(true), None);
    }

    #[test]
    fn test_single_frame_flush() {
        let mut buffer = FrameBuffer::new(1024);
        buffer.append(vec![7, 8, 9]).unwrap();
        assert_eq!(buffer.flush_if_ready(true), Some(vec![7, 8, 9]));
        assert_eq!(buffer.flush_if_ready(true), None);
    }

    #[test]
    fn test_overflow_rejects_frame_and_keeps_existing_audio() {
        let mut buffer = FrameBuffer::new(16);
        buffer.append(vec![1; 10]).unwrap();

        let err = buffer.append(vec![2; 10]).unwrap_err();
        assert_eq!(err, RelayError::BufferOverflow { buffered: 10, incoming: 10, limit: 16 });
        assert_eq!(buffer.buffered_bytes(), 10);

        // Exactly filling the bound is allowed
        buffer.append(vec![3; 6]).unwrap();
        assert_eq!(buffer.flush_if_ready(true).map(|p| p.len()), Some(16));
    }

    #[test]
    fn test_clear() {
        let mut buffer = FrameBuffer::new(64);
        buffer.append(vec![1; 8]).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.flush_if_ready(true), None);
    }
}
