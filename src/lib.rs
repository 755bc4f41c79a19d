//! pcmflow - audio filter chain and PCM frame queue
//!
//! Decoded audio goes through a filter chain
//! (`abuffer -> user filters -> atempo -> abuffersink`), is stamped with
//! reconstructed presentation timestamps, copied into a circular byte buffer
//! and described by small [`AudioFrame`] descriptors in a bounded queue.
//!
//! Design principles:
//! - Filter parameters change through messages, never shared state
//! - Speed changes update the tempo filter live and rewrite queued frames
//! - The producer is paused (not failed) while the queue is full
//! - Descriptors carry the buffer generation and lap, so stale reads are detected
//!
//! ```
//! use std::sync::Arc;
//! use pcmflow::{AudioPipeline, ChannelLayout, FilterRegistry, PipelineConfig, RawFrame, SampleFormat, StreamInfo};
//!
//! let pipeline = AudioPipeline::new(PipelineConfig::default(), Arc::new(FilterRegistry::default())).unwrap();
//! pipeline.open(StreamInfo::new(48000, ChannelLayout::Stereo, SampleFormat::S16)).unwrap();
//!
//! pipeline.ingest(Some(RawFrame::packed(vec![0; 1024 * 4], 1024, Some(0))));
//! let frame = pipeline.pop_frame().unwrap();
//! assert_eq!(pipeline.read_frame(&frame).unwrap().len(), 1024 * 4);
//! ```

mod buffer;
mod chain;
mod config;
mod error;
mod format;
mod frame;
mod graph;
mod node;
pub mod nodes;
mod pipeline;
mod queue;
mod speed;
mod status;
mod timestamp;

#[cfg(feature = "cpal_sink")]
mod device;

pub use buffer::CircularBuffer;
pub use chain::{FilterChain, FilterSpec, SinkConstraints, SINK_ID, SOURCE_ID, TEMPO_ID};
pub use config::PipelineConfig;
pub use error::{FilterError, PipelineError, Result};
pub use format::{align, rescale, rescale_truncate, ChannelLayout, Rational, SampleFormat, StreamInfo, TICKS_PER_SECOND, TICK_TIME_BASE};
pub use frame::{AudioFrame, RawFrame, SampleBlock, SinkFrame};
pub use graph::{FilterGraph, FilterInstance, PullError};
pub use node::{FilterNode, ProcessContext};
pub use nodes::FilterRegistry;
pub use pipeline::AudioPipeline;
pub use queue::{FrameQueue, WidenGuard};
pub use speed::{resize_frame, SpeedState};
pub use status::PipelineStatus;
pub use timestamp::TimestampReconstructor;

#[cfg(feature = "cpal_sink")]
pub use device::CpalPlayback;
