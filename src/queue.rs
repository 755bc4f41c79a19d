//! Bounded queue of frame descriptors

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::frame::AudioFrame;

/// Descriptors waiting for the playback consumer.
///
/// The queue itself never refuses a frame; [`is_full`](Self::is_full) is the
/// backpressure threshold the drain loop waits on. The threshold is
/// `max_frames * multiplier`, with the multiplier raised while queued frames
/// are rewritten for a speed change.
#[derive(Debug)]
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    max_frames: usize,
    multiplier: AtomicUsize,
}

impl FrameQueue {
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: Mutex::new(VecDeque::with_capacity(max_frames)),
            max_frames: max_frames.max(1),
            multiplier: AtomicUsize::new(1),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    #[inline]
    pub fn threshold(&self) -> usize {
        self.max_frames * self.multiplier.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.threshold()
    }

    pub fn push(&self, frame: AudioFrame) {
        self.frames.lock().push_back(frame);
    }

    pub fn pop(&self) -> Option<AudioFrame> {
        self.frames.lock().pop_front()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
    }

    /// Run `f` over the queued frames with the queue locked.
    pub fn with_frames_mut<R>(&self, f: impl FnOnce(&mut VecDeque<AudioFrame>) -> R) -> R {
        f(&mut self.frames.lock())
    }

    /// Raise the threshold multiplier until the guard is dropped.
    pub fn widen(&self, multiplier: usize) -> WidenGuard<'_> {
        self.multiplier.store(multiplier.max(1), Ordering::Release);
        WidenGuard { queue: self }
    }
}

/// Restores the normal threshold on drop.
#[must_use]
pub struct WidenGuard<'a> {
    queue: &'a FrameQueue,
}

impl Drop for WidenGuard<'_> {
    fn drop(&mut self) {
        self.queue.multiplier.store(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(offset: usize) -> AudioFrame {
        AudioFrame {
            offset,
            len: 4,
            timestamp: offset as i64,
            generation: 1,
            lap: 0,
        }
    }

    #[test]
    fn threshold_and_order() {
        let queue = FrameQueue::new(2);
        queue.push(frame(0));
        assert!(!queue.is_full());
        queue.push(frame(4));
        assert!(queue.is_full());

        assert_eq!(queue.pop().map(|f| f.offset), Some(0));
        assert!(!queue.is_full());
        assert_eq!(queue.pop().map(|f| f.offset), Some(4));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn widening_is_scoped() {
        let queue = FrameQueue::new(2);
        queue.push(frame(0));
        queue.push(frame(4));
        {
            let _wide = queue.widen(4);
            assert_eq!(queue.threshold(), 8);
            assert!(!queue.is_full());
        }
        assert_eq!(queue.threshold(), 2);
        assert!(queue.is_full());
    }
}
