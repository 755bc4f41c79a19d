//! Circular byte buffer backing queued PCM frames.
//!
//! ```text
//!  0                         cursor                    capacity
//!  |####### lap n+1 ########|........ lap n ..........|
//! ```
//!
//! Writes never straddle the end: a write that would overrun wraps the
//! cursor to 0 first and overwrites whatever older data lives there. Frames
//! still referencing that data become stale, which [`CircularBuffer::read`]
//! detects through the lap counter instead of handing out overwritten audio.

use tracing::{debug, trace};

use crate::format::align;
use crate::frame::AudioFrame;

/// Fixed-capacity circular byte region with a single write cursor.
#[derive(Debug)]
pub struct CircularBuffer {
    data: Vec<u8>,
    cursor: usize,
    /// Bytes per sample frame (all channels), the alignment unit
    frame_bytes: usize,
    /// How many maximum-size frames fit in the region
    slots: usize,
    /// Largest frame payload the current allocation was sized for
    max_frame_bytes: usize,
    generation: u64,
    lap: u64,
}

impl CircularBuffer {
    /// Create an empty buffer. Nothing is allocated until the first write.
    pub fn new(frame_bytes: usize, slots: usize) -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
            frame_bytes: frame_bytes.max(1),
            slots: slots.max(1),
            max_frame_bytes: 0,
            generation: 0,
            lap: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    /// Largest frame (in samples per channel) the current allocation is sized for.
    #[inline]
    pub fn max_frame_samples(&self) -> usize {
        self.max_frame_bytes / self.frame_bytes
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn lap(&self) -> u64 {
        self.lap
    }

    /// Grow the region if a frame of `required_bytes` does not fit the current sizing.
    ///
    /// The new region holds `slots` frames of `required_bytes` plus 20% slack.
    /// Reallocation resets the cursor and invalidates every frame issued so far.
    /// Returns whether a reallocation happened.
    pub fn ensure_capacity(&mut self, required_bytes: usize) -> bool {
        if !self.needs_growth(required_bytes) {
            return false;
        }

        let per_frame = align(required_bytes + required_bytes / 5, self.frame_bytes);
        let capacity = per_frame * self.slots;

        debug!(
            "Allocating circular buffer: {} bytes ({} slots x {} bytes, generation {})",
            capacity,
            self.slots,
            per_frame,
            self.generation + 1
        );

        self.data = vec![0u8; capacity];
        self.max_frame_bytes = per_frame;
        self.cursor = 0;
        self.generation += 1;
        self.lap = 0;
        true
    }

    #[inline]
    fn needs_growth(&self, required_bytes: usize) -> bool {
        required_bytes > self.max_frame_bytes || required_bytes > self.data.len()
    }

    /// Like [`ensure_capacity`](Self::ensure_capacity), but carries `frames`
    /// that are still readable over into the new region.
    pub fn grow_preserving<'a>(
        &mut self,
        required_bytes: usize,
        frames: impl IntoIterator<Item = &'a mut AudioFrame>,
    ) -> bool {
        if !self.needs_growth(required_bytes) {
            return false;
        }

        let kept: Vec<(&mut AudioFrame, Vec<u8>)> = frames
            .into_iter()
            .filter_map(|frame| {
                let payload = self.read(frame)?.to_vec();
                Some((frame, payload))
            })
            .collect();

        self.ensure_capacity(required_bytes);
        let moved = kept.len();
        for (frame, payload) in kept {
            *frame = self.write_frame(&payload, frame.timestamp);
        }
        if moved > 0 {
            debug!("Moved {} queued frames into the new buffer", moved);
        }
        true
    }

    /// Copy `bytes` in at the cursor and return the offset used.
    ///
    /// Wraps the cursor to 0 first if the bytes do not fit in the remaining
    /// linear space. Older data at the start of the region is overwritten.
    pub fn write(&mut self, bytes: &[u8]) -> usize {
        if bytes.len() > self.data.len() {
            self.ensure_capacity(bytes.len());
        }

        if self.cursor + bytes.len() > self.data.len() {
            trace!("Circular buffer wrap at {} (lap {})", self.cursor, self.lap + 1);
            self.cursor = 0;
            self.lap += 1;
        }

        let offset = self.cursor;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.cursor += bytes.len();

        if self.cursor == self.data.len() {
            self.cursor = 0;
            self.lap += 1;
        }

        offset
    }

    /// Write `bytes` and describe them as a frame presented at `timestamp`.
    pub fn write_frame(&mut self, bytes: &[u8], timestamp: i64) -> AudioFrame {
        let offset = self.write(bytes);
        AudioFrame {
            offset,
            len: bytes.len(),
            timestamp,
            generation: self.generation,
            lap: self.lap_at(offset),
        }
    }

    /// The lap in which the byte at `offset` was last written.
    #[inline]
    pub(crate) fn lap_at(&self, offset: usize) -> u64 {
        if offset < self.cursor {
            self.lap
        } else {
            self.lap.saturating_sub(1)
        }
    }

    /// Whether `frame` still refers to the bytes it was written with.
    pub fn is_valid(&self, frame: &AudioFrame) -> bool {
        if frame.generation != self.generation || frame.offset + frame.len > self.data.len() {
            return false;
        }
        frame.lap == self.lap || (frame.lap + 1 == self.lap && self.cursor <= frame.offset)
    }

    /// The payload of `frame`, or `None` if it has been overwritten.
    pub fn read(&self, frame: &AudioFrame) -> Option<&[u8]> {
        if !self.is_valid(frame) {
            return None;
        }
        Some(&self.data[frame.offset..frame.offset + frame.len])
    }

    /// Zero `[start, end)`, clamped to the region.
    pub(crate) fn silence(&mut self, start: usize, end: usize) {
        let end = end.min(self.data.len());
        if start < end {
            self.data[start..end].iter_mut().for_each(|b| *b = 0);
        }
    }

    /// Drop the allocation. Every issued frame becomes stale.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.cursor = 0;
        self.max_frame_bytes = 0;
        self.generation += 1;
        self.lap = 0;
    }
}
