//! Presentation timestamps for filtered frames
//!
//! Filters regroup samples, so sink frame timestamps are not trusted. Each
//! output frame is stamped from the first input timestamp plus the number of
//! samples emitted so far, scaled by the playback speed.

use crate::format::{rescale, rescale_truncate, Rational, StreamInfo, TICK_TIME_BASE};
use crate::frame::SinkFrame;

#[derive(Clone, Debug)]
pub struct TimestampReconstructor {
    codec_time_base: Rational,
    stream_time_base: Rational,
    /// Demuxer start offset in ticks
    start_time: i64,
    /// Output delay in ticks
    delay: i64,
    first_pts: Option<i64>,
    /// Samples emitted since `first_pts`, in playback time
    running_samples: i64,
}

impl TimestampReconstructor {
    pub fn new(info: &StreamInfo, delay: i64) -> Self {
        Self {
            codec_time_base: info.codec_time_base,
            stream_time_base: info.stream_time_base,
            start_time: info.start_time,
            delay,
            first_pts: None,
            running_samples: 0,
        }
    }

    #[inline]
    pub fn first_pts(&self) -> Option<i64> {
        self.first_pts
    }

    #[inline]
    pub fn running_samples(&self) -> i64 {
        self.running_samples
    }

    /// Record the timestamp of an input frame (stream time base).
    pub fn observe_input(&mut self, pts: Option<i64>) {
        if self.first_pts.is_none() {
            if let Some(pts) = pts {
                self.first_pts = Some(pts);
                self.running_samples = 0;
            }
        }
    }

    /// Presentation timestamp in ticks for `frame`, or `None` if the frame
    /// carries no timestamp and must be dropped.
    ///
    /// Sub-tick remainders are truncated.
    pub fn stamp(&mut self, frame: &SinkFrame, speed: f64) -> Option<i64> {
        let pts = frame.pts?;
        let first = *self.first_pts.get_or_insert(pts);

        let output_pts = first + rescale(self.running_samples, self.codec_time_base, self.stream_time_base);
        let ticks = rescale_truncate(output_pts, self.stream_time_base, TICK_TIME_BASE);
        let timestamp = ticks - self.start_time + self.delay;

        self.running_samples += (frame.nb_samples as f64 * speed) as i64;
        Some(timestamp)
    }
}
