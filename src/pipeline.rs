//! The audio pipeline: filter chain, circular buffer and frame queue
//!
//! A worker thread feeds decoded frames through [`AudioPipeline::ingest`],
//! a playback consumer drains descriptors with [`AudioPipeline::pop_frame`]
//! and a control plane changes speed or filters at any time.
//!
//! # Locking
//!
//! Locks are always taken in this order:
//!
//! 1. speed (`set_speed`, rebuilds)
//! 2. state: filter chain, buffer and timestamp state
//! 3. frame queue
//!
//! The status cell is a leaf and is never held while taking another lock.
//! The drain loop releases the state lock while it waits for the consumer,
//! so a rebuild or dispose is never stuck behind a stalled consumer.

use std::sync::Arc;
use std::thread;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::buffer::CircularBuffer;
use crate::chain::{FilterChain, FilterSpec, SinkConstraints, TEMPO_ID};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::format::StreamInfo;
use crate::frame::{AudioFrame, RawFrame};
use crate::graph::PullError;
use crate::nodes::FilterRegistry;
use crate::queue::FrameQueue;
use crate::speed::{is_valid_speed, resize_frame, SpeedState};
use crate::status::{PipelineStatus, StatusCell};
use crate::timestamp::TimestampReconstructor;

struct FilterState {
    chain: Option<FilterChain>,
    stream: Option<StreamInfo>,
    user_filters: Vec<FilterSpec>,
    buffer: CircularBuffer,
    timestamps: Option<TimestampReconstructor>,
    /// Speed used to count emitted samples, mirrors `SpeedState::current`
    speed: f64,
}

impl FilterState {
    fn dispose_chain(&mut self) {
        if self.chain.take().is_some() {
            debug!("Disposed filter chain");
        }
        self.timestamps = None;
    }
}

pub struct AudioPipeline {
    config: PipelineConfig,
    registry: Arc<FilterRegistry>,
    speed: Mutex<SpeedState>,
    state: Mutex<FilterState>,
    queue: FrameQueue,
    status: StatusCell,
}

impl AudioPipeline {
    pub fn new(config: PipelineConfig, registry: Arc<FilterRegistry>) -> Result<Self> {
        config.validate()?;

        let frame_bytes = SinkConstraints::stereo(config.output_sample_format, 0).frame_bytes();
        let state = FilterState {
            chain: None,
            stream: None,
            user_filters: config.filters.clone(),
            buffer: CircularBuffer::new(frame_bytes, config.buffer_slots()),
            timestamps: None,
            speed: config.initial_speed,
        };

        Ok(Self {
            speed: Mutex::new(SpeedState::new(config.initial_speed)),
            state: Mutex::new(state),
            queue: FrameQueue::new(config.max_audio_frames),
            status: StatusCell::new(PipelineStatus::Stopped),
            registry,
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn status(&self) -> PipelineStatus {
        self.status.get()
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        self.speed.lock().current
    }

    #[inline]
    pub fn queued_frames(&self) -> usize {
        self.queue.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.state.lock().buffer.capacity()
    }

    /// Bytes per output sample frame.
    pub fn frame_bytes(&self) -> usize {
        self.state.lock().buffer.frame_bytes()
    }

    pub fn is_built(&self) -> bool {
        self.state.lock().chain.is_some()
    }

    /// Node ids of the active chain, source to sink.
    pub fn chain(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .chain
            .as_ref()
            .map(|chain| chain.chain().into_iter().map(String::from).collect())
            .unwrap_or_default()
    }

    /// Build the filter chain for `info` and start running.
    ///
    /// Any previous chain and queued frames are dropped first. On failure
    /// nothing is left built and the status is `Stopped`.
    pub fn open(&self, info: StreamInfo) -> Result<()> {
        let speed = self.speed.lock();
        let mut state = self.state.lock();

        state.stream = Some(info);
        self.queue.clear();
        self.rebuild(&mut state, speed.current)?;
        self.status.reset(PipelineStatus::Running);
        info!(
            "Opened audio pipeline: {} Hz {} {}",
            info.sample_rate, info.channel_layout, info.sample_format
        );
        Ok(())
    }

    /// Rebuild for a new stream description after a decoder reset.
    pub fn reconfigure(&self, info: StreamInfo) -> Result<()> {
        self.open(info)
    }

    /// Rebuild for the current stream, drop queued frames and resume.
    pub fn restart(&self) -> Result<()> {
        let speed = self.speed.lock();
        let mut state = self.state.lock();

        self.queue.clear();
        self.rebuild(&mut state, speed.current)?;
        self.status.reset(PipelineStatus::Running);
        Ok(())
    }

    /// Ask the producer to stop feeding this pipeline.
    pub fn stop(&self) {
        self.status.transition(PipelineStatus::Stopping);
    }

    /// Drop the chain, the queued frames and the buffer. Safe to call repeatedly.
    pub fn dispose(&self) {
        let mut state = self.state.lock();
        state.dispose_chain();
        self.queue.clear();
        state.buffer.clear();
        self.status.reset(PipelineStatus::Stopped);
    }

    fn rebuild(&self, state: &mut FilterState, speed: f64) -> Result<()> {
        state.dispose_chain();

        let info = match state.stream {
            Some(info) => info,
            None => {
                self.status.reset(PipelineStatus::Stopped);
                return Err(PipelineError::NotBuilt);
            }
        };

        let constraints = SinkConstraints::stereo(
            self.config.output_sample_format,
            self.config.output_sample_rate.unwrap_or(info.sample_rate),
        );
        let filters: &[FilterSpec] = if self.config.filters_enabled {
            &state.user_filters
        } else {
            &[]
        };

        match FilterChain::build(&info, &constraints, filters, speed, &self.registry) {
            Ok(chain) => {
                state.chain = Some(chain);
                state.timestamps = Some(TimestampReconstructor::new(&info, self.config.delay_ticks));
                state.speed = speed;
                Ok(())
            }
            Err(e) => {
                self.status.reset(PipelineStatus::Stopped);
                Err(e.into())
            }
        }
    }

    /// Feed a decoded frame, or `None` to flush, and drain the filter output
    /// into the frame queue.
    ///
    /// Blocks while the queue is full. Failures surface through
    /// [`status`](Self::status): `Stopping` when the source rejects input,
    /// `Ended` once the last frame has been queued.
    pub fn ingest(&self, frame: Option<RawFrame>) {
        let mut state = self.state.lock();

        let status = self.status.get();
        if status.is_terminal() || status == PipelineStatus::Stopped {
            trace!("Ignoring input while {}", status);
            return;
        }

        let FilterState {
            chain, timestamps, ..
        } = &mut *state;
        let chain = match chain.as_mut() {
            Some(chain) => chain,
            None => return,
        };

        let pushed = match frame {
            Some(frame) => {
                if let Some(timestamps) = timestamps.as_mut() {
                    timestamps.observe_input(frame.pts);
                }
                chain.push(Some(frame))
            }
            None => {
                self.status.transition(PipelineStatus::Draining);
                chain.push(None)
            }
        };

        if let Err(e) = pushed {
            warn!("{}", e);
            self.status.transition(PipelineStatus::Stopping);
            return;
        }

        self.drain(&mut state);
    }

    /// Pull every available frame out of the sink into the buffer and queue.
    fn drain(&self, state: &mut MutexGuard<'_, FilterState>) {
        loop {
            let pulled = match state.chain.as_mut() {
                Some(chain) => chain.pull(),
                None => return,
            };
            let out = match pulled {
                Ok(out) => out,
                Err(PullError::Again) => return,
                Err(PullError::Eof) => {
                    self.status.transition(PipelineStatus::Ended);
                    return;
                }
            };

            let speed = state.speed;
            let timestamp = match state.timestamps.as_mut().and_then(|ts| ts.stamp(&out, speed)) {
                Some(timestamp) => timestamp,
                None => {
                    trace!("Dropping filtered frame without timestamp");
                    continue;
                }
            };
            trace!("Processed frame at {} ({} samples)", timestamp, out.nb_samples);

            let buffer = &mut state.buffer;
            if out.data.len() > buffer.max_frame_samples() * buffer.frame_bytes() {
                self.queue
                    .with_frames_mut(|frames| buffer.grow_preserving(out.data.len(), frames.iter_mut()));
            }
            let frame = buffer.write_frame(&out.data, timestamp);
            self.queue.push(frame);

            if self.queue.is_full() && !self.wait_for_consumer(state) {
                return;
            }
        }
    }

    /// Block until the queue drops below its threshold.
    ///
    /// Returns whether draining should continue.
    fn wait_for_consumer(&self, state: &mut MutexGuard<'_, FilterState>) -> bool {
        self.status
            .transition_from(PipelineStatus::Running, PipelineStatus::QueueFull);

        MutexGuard::unlocked(state, || {
            while self.queue.is_full() && self.status.get().is_waiting() {
                thread::sleep(self.config.poll_interval());
            }
        });

        if self
            .status
            .transition_from(PipelineStatus::QueueFull, PipelineStatus::Running)
        {
            return true;
        }
        self.status.get() == PipelineStatus::Draining
    }

    /// Change playback speed.
    ///
    /// The tempo filter is updated in place first; if it rejects the new
    /// speed nothing else changes. Queued frames are then rewritten for the
    /// new speed (truncated when speeding up, extended with silence when
    /// slowing down).
    pub fn set_speed(&self, speed: f64) -> Result<()> {
        if !is_valid_speed(speed) {
            return Err(PipelineError::InvalidSpeed(speed));
        }

        let _widened = self.queue.widen(self.config.speed_transition_multiplier);
        let mut current = self.speed.lock();
        if current.current == speed {
            return Ok(());
        }

        let mut state = self.state.lock();
        if let Some(chain) = state.chain.as_mut() {
            chain.send_command(TEMPO_ID, "tempo", &format!("{:.2}", speed))?;
        }

        let old = current.change(speed);
        state.speed = speed;

        let buffer = &mut state.buffer;
        let rewritten = self.queue.with_frames_mut(|frames| {
            for frame in frames.iter_mut() {
                resize_frame(buffer, frame, old, speed);
            }
            frames.len()
        });
        debug!("Speed {} -> {}, rewrote {} queued frames", old, speed, rewritten);
        Ok(())
    }

    /// Send a runtime command to a filter of the active chain.
    pub fn update_filter(&self, id: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        let chain = state.chain.as_mut().ok_or(PipelineError::NotBuilt)?;
        chain.send_command(id, key, value)?;
        Ok(())
    }

    /// Replace the user filters and rebuild the chain.
    ///
    /// Only possible when filters are enabled for this pipeline and the
    /// registry provides the mandatory filters. Queued frames are kept.
    pub fn reload_filters(&self, filters: Vec<FilterSpec>) -> Result<()> {
        if !self.config.filters_enabled || !self.registry.supports_filtering() {
            return Err(PipelineError::FiltersUnavailable);
        }

        let speed = self.speed.lock();
        let mut state = self.state.lock();
        state.user_filters = filters;
        self.rebuild(&mut state, speed.current)
    }

    /// Take the oldest queued frame.
    pub fn pop_frame(&self) -> Option<AudioFrame> {
        self.queue.pop()
    }

    /// Copy out the payload of `frame`.
    pub fn read_frame(&self, frame: &AudioFrame) -> Result<Vec<u8>> {
        self.with_frame_data(frame, <[u8]>::to_vec)
    }

    /// Run `f` over the payload of `frame` without copying it.
    pub fn with_frame_data<R>(&self, frame: &AudioFrame, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let state = self.state.lock();
        state.buffer.read(frame).map(f).ok_or(PipelineError::StaleFrame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn pipeline(config: PipelineConfig) -> AudioPipeline {
        AudioPipeline::new(config, Arc::new(FilterRegistry::default())).unwrap()
    }

    fn info() -> StreamInfo {
        StreamInfo::new(8000, ChannelLayout::Stereo, SampleFormat::S16)
    }

    fn frame(nb_samples: usize, pts: i64) -> RawFrame {
        RawFrame::packed(vec![1u8; nb_samples * 4], nb_samples, Some(pts))
    }

    #[test]
    fn starts_stopped_and_ignores_input() {
        let pipeline = pipeline(PipelineConfig::default());
        assert_eq!(pipeline.status(), PipelineStatus::Stopped);
        assert!(!pipeline.is_built());

        pipeline.ingest(Some(frame(10, 0)));
        assert_eq!(pipeline.queued_frames(), 0);
        assert!(matches!(pipeline.restart(), Err(PipelineError::NotBuilt)));
    }

    #[test]
    fn open_builds_and_runs() {
        let pipeline = pipeline(PipelineConfig::default());
        pipeline.open(info()).unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Running);
        assert_eq!(pipeline.chain(), vec!["abuffer", "atempo", "abuffersink"]);

        pipeline.ingest(Some(frame(100, 0)));
        let out = pipeline.pop_frame().unwrap();
        assert_eq!(out.len, 400);
        assert_eq!(out.timestamp, 0);
        assert_eq!(pipeline.read_frame(&out).unwrap().len(), 400);
    }

    #[test]
    fn failed_open_leaves_nothing_built() {
        let config = PipelineConfig {
            output_sample_rate: Some(44100),
            ..PipelineConfig::default()
        };
        let pipeline = pipeline(config);
        assert!(pipeline.open(info()).is_err());
        assert!(!pipeline.is_built());
        assert_eq!(pipeline.status(), PipelineStatus::Stopped);
    }

    #[test]
    fn disabled_filters_are_not_applied_or_reloaded() {
        let config = PipelineConfig {
            filters_enabled: false,
            filters: vec![FilterSpec::new("volume", "0.5")],
            ..PipelineConfig::default()
        };
        let pipeline = pipeline(config);
        pipeline.open(info()).unwrap();
        assert_eq!(pipeline.chain(), vec!["abuffer", "atempo", "abuffersink"]);
        assert!(matches!(
            pipeline.reload_filters(vec![]),
            Err(PipelineError::FiltersUnavailable)
        ));
    }

    #[test]
    fn stop_is_terminal() {
        let pipeline = pipeline(PipelineConfig::default());
        pipeline.open(info()).unwrap();
        pipeline.stop();
        assert_eq!(pipeline.status(), PipelineStatus::Stopping);

        pipeline.ingest(Some(frame(10, 0)));
        assert_eq!(pipeline.queued_frames(), 0);

        pipeline.restart().unwrap();
        assert_eq!(pipeline.status(), PipelineStatus::Running);
    }

    #[test]
    fn rejects_invalid_speed() {
        let pipeline = pipeline(PipelineConfig::default());
        assert!(matches!(pipeline.set_speed(0.0), Err(PipelineError::InvalidSpeed(_))));
        assert!(matches!(pipeline.set_speed(f64::INFINITY), Err(PipelineError::InvalidSpeed(_))));
        assert!(pipeline.set_speed(1.0).is_ok());
        assert_eq!(pipeline.speed(), 1.0);
    }

    #[test]
    fn speed_outside_tempo_range_changes_nothing() {
        let pipeline = pipeline(PipelineConfig::default());
        pipeline.open(info()).unwrap();
        pipeline.ingest(Some(frame(100, 0)));

        assert!(matches!(pipeline.set_speed(0.25), Err(PipelineError::InvalidSpeed(_))));
        assert!(matches!(pipeline.set_speed(250.0), Err(PipelineError::InvalidSpeed(_))));
        assert_eq!(pipeline.speed(), 1.0);
        assert_eq!(pipeline.pop_frame().map(|f| f.len), Some(400));
    }

    #[test]
    fn update_filter_needs_a_chain() {
        let pipeline = pipeline(PipelineConfig::default().with_filters(vec![FilterSpec::new("volume", "1")]));
        assert!(matches!(
            pipeline.update_filter("volume", "volume", "0.5"),
            Err(PipelineError::NotBuilt)
        ));
        pipeline.open(info()).unwrap();
        assert!(pipeline.update_filter("volume", "volume", "0.5").is_ok());
        assert!(pipeline.update_filter("volume", "gain", "0.5").is_err());
    }
}
