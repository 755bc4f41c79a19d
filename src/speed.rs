//! Playback speed and retroactive rewriting of queued frames

use tracing::trace;

use crate::buffer::CircularBuffer;
use crate::format::align;
use crate::frame::AudioFrame;
use crate::nodes::{MAX_TEMPO, MIN_TEMPO};

/// Current and previous playback speed.
///
/// The previous value is kept so frames produced under it can be rescaled
/// when the speed changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedState {
    pub current: f64,
    pub previous: f64,
}

impl SpeedState {
    pub fn new(speed: f64) -> Self {
        Self {
            current: speed,
            previous: speed,
        }
    }

    /// Record `speed` as current. Returns the speed it replaces.
    pub fn change(&mut self, speed: f64) -> f64 {
        self.previous = self.current;
        self.current = speed;
        self.previous
    }
}

/// Whether `speed` can be used as a playback speed: the tempo filter
/// accepts it once formatted with two decimals.
pub fn is_valid_speed(speed: f64) -> bool {
    if !speed.is_finite() || speed <= 0.0 {
        return false;
    }
    let rounded = (speed * 100.0).round() / 100.0;
    (MIN_TEMPO..=MAX_TEMPO).contains(&rounded)
}

/// Rewrite the length of a queued frame for a new speed.
///
/// The payload is not resampled: speeding up truncates the frame, slowing
/// down extends it with silence. A frame that would grow past the end of the
/// buffer is moved to offset 0 and fully silenced.
pub fn resize_frame(buffer: &mut CircularBuffer, frame: &mut AudioFrame, old_speed: f64, new_speed: f64) {
    let frame_bytes = buffer.frame_bytes();
    let old_len = frame.len;
    let new_len = align((old_len as f64 * old_speed / new_speed) as usize, frame_bytes).min(buffer.capacity());
    frame.len = new_len;

    if new_speed >= old_speed || new_len <= old_len {
        return;
    }

    let mut fill_from = frame.offset + old_len;
    if frame.offset + new_len > buffer.capacity() {
        trace!("Relocating frame at {} ({} -> {} bytes)", frame.offset, old_len, new_len);
        frame.offset = 0;
        frame.generation = buffer.generation();
        frame.lap = buffer.lap_at(0);
        fill_from = 0;
    }
    buffer.silence(fill_from, frame.offset + new_len);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(buffer: &mut CircularBuffer, bytes: &[u8]) -> AudioFrame {
        buffer.write_frame(bytes, 0)
    }

    #[test]
    fn speed_state_keeps_previous() {
        let mut speed = SpeedState::new(1.0);
        assert_eq!(speed.change(2.0), 1.0);
        assert_eq!(speed, SpeedState { current: 2.0, previous: 1.0 });
        assert!(!is_valid_speed(0.0));
        assert!(!is_valid_speed(f64::NAN));
        assert!(!is_valid_speed(-1.0));
        assert!(!is_valid_speed(0.25));
        assert!(!is_valid_speed(100.5));
        assert!(is_valid_speed(0.5));
        assert!(is_valid_speed(0.499));
        assert!(is_valid_speed(100.0));
    }

    #[test]
    fn speeding_up_truncates_in_place() {
        let mut buffer = CircularBuffer::new(4, 4);
        buffer.ensure_capacity(400);
        let mut frame = queued(&mut buffer, &[7u8; 400]);

        resize_frame(&mut buffer, &mut frame, 1.0, 2.0);
        assert_eq!(frame.offset, 0);
        assert_eq!(frame.len, 200);
        assert_eq!(buffer.read(&frame), Some(&[7u8; 200][..]));
    }

    #[test]
    fn lengths_stay_aligned() {
        let mut buffer = CircularBuffer::new(4, 4);
        buffer.ensure_capacity(400);
        let mut frame = queued(&mut buffer, &[1u8; 12]);

        resize_frame(&mut buffer, &mut frame, 1.0, 1.5);
        // 12 / 1.5 = 8
        assert_eq!(frame.len, 8);
        resize_frame(&mut buffer, &mut frame, 1.0, 3.0);
        // trunc(8 / 3) = 2, aligned up to 4
        assert_eq!(frame.len, 4);
    }

    #[test]
    fn slowing_down_fills_silence() {
        let mut buffer = CircularBuffer::new(4, 4);
        buffer.ensure_capacity(100);
        let mut frame = queued(&mut buffer, &[9u8; 40]);
        queued(&mut buffer, &[5u8; 40]);

        resize_frame(&mut buffer, &mut frame, 1.0, 0.5);
        assert_eq!(frame.len, 80);
        let data = buffer.read(&frame).unwrap();
        assert!(data[..40].iter().all(|&b| b == 9));
        assert!(data[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn growth_past_the_end_relocates() {
        let mut buffer = CircularBuffer::new(4, 2);
        buffer.ensure_capacity(100); // 240
        queued(&mut buffer, &[1u8; 100]);
        let mut frame = queued(&mut buffer, &[2u8; 100]);
        assert_eq!(frame.offset, 100);

        resize_frame(&mut buffer, &mut frame, 1.0, 0.5);
        assert_eq!(frame.offset, 0);
        assert_eq!(frame.len, 200);
        assert!(frame.offset + frame.len <= buffer.capacity());
        assert!(buffer.read(&frame).unwrap().iter().all(|&b| b == 0));
    }
}
