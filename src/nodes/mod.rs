//! Built-in filters.
//!
//! Filters are organized into three categories:
//!
//! ## Sources ([`source`])
//!
//! - [`BufferSource`] (`abuffer`) - accepts decoded frames in any sample format
//!
//! ## Effects ([`effect`])
//!
//! Process interleaved f32 blocks:
//! - [`Null`] (`anull`) - pass through
//! - [`Volume`] (`volume`) - gain with smoothing
//! - [`Tempo`] (`atempo`) - change speed, keep pitch
//! - [`Biquad`] (`lowpass`, `highpass`) - second order filters
//!
//! ## Sinks ([`sink`])
//!
//! - [`BufferSink`] (`abuffersink`) - remixes and converts to the output format
//!
//! # Message Types
//!
//! Effects with runtime parameters accept textual commands that are turned
//! into typed messages:
//! - [`VolumeMessage`] - `volume`
//! - [`TempoMessage`] - `tempo`
//! - [`BiquadMessage`] - `f` / `frequency`, `w` / `width`
//!
//! [`Null`] has no parameters and uses `()` as its message type.

mod args;
pub mod effect;
mod registry;
pub mod sink;
pub mod source;

pub use args::FilterArgs;
pub use effect::{
    Biquad, BiquadKind, BiquadMessage, Null, Tempo, TempoMessage, Volume, VolumeMessage, MAX_TEMPO, MIN_TEMPO,
};
pub use registry::FilterRegistry;
pub use sink::BufferSink;
pub use source::BufferSource;
