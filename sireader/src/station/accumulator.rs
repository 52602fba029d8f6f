//! Assembles raw serial chunks into whole station frames.
//!
//! The port hands over arbitrary chunks. Frames are delimited by a length
//! byte rather than an end marker (ETX also occurs inside payloads), so the
//! accumulator buffers until the announced total is present. A long silence
//! mid-frame means the station gave up; the partial prefix is dropped.

use std::time::{Duration, Instant};

use bytes::Bytes;

use super::frame::{Frame, STX};

/// Largest possible frame: STX + command + length + 133-byte payload + two
/// checksum bytes + ETX.
pub const MAX_MESSAGE_SIZE: usize = 139;

/// Header plus trailer around the payload: STX, command, length, two
/// checksum bytes, ETX.
const FRAME_OVERHEAD: usize = 6;

const STALE_AFTER: Duration = Duration::from_millis(500);

pub struct FrameAccumulator {
    buf: [u8; MAX_MESSAGE_SIZE],
    len: usize,
    last_chunk: Option<Instant>,
}

impl FrameAccumulator {
    pub fn new() -> Self {
        FrameAccumulator {
            buf: [0; MAX_MESSAGE_SIZE],
            len: 0,
            last_chunk: None,
        }
    }

    /// Appends a chunk and returns every frame completed by it, in order.
    ///
    /// `now` is the chunk's arrival time; a gap longer than 500 ms discards
    /// whatever partial frame was pending. Bytes beyond the buffer capacity
    /// are clipped.
    pub fn push(&mut self, chunk: &[u8], now: Instant) -> Vec<Frame> {
        if let Some(last) = self.last_chunk {
            if now.duration_since(last) > STALE_AFTER {
                self.len = 0;
            }
        }
        self.last_chunk = Some(now);

        let take = chunk.len().min(MAX_MESSAGE_SIZE - self.len);
        self.buf[self.len..self.len + take].copy_from_slice(&chunk[..take]);
        self.len += take;

        let mut frames = Vec::new();
        loop {
            if self.len == 1 && self.buf[0] != STX {
                frames.push(Frame::from_bytes(Bytes::copy_from_slice(&self.buf[..1])));
                self.len = 0;
                break;
            }
            if self.len < 3 {
                break;
            }
            let expected = usize::from(self.buf[2]) + FRAME_OVERHEAD;
            if self.len < expected {
                break;
            }
            frames.push(Frame::from_bytes(Bytes::copy_from_slice(
                &self.buf[..expected],
            )));
            self.buf.copy_within(expected..self.len, 0);
            self.len -= expected;
        }
        frames
    }
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
