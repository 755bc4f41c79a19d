//! Pipeline configuration
//!
//! Every field has a built-in default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! max_audio_frames = 10
//! poll_interval_ms = 20
//! output_sample_format = "s16"
//!
//! [[filters]]
//! name = "volume"
//! args = "-3dB"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chain::FilterSpec;
use crate::error::{PipelineError, Result};
use crate::format::SampleFormat;
use crate::speed::is_valid_speed;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Queued frames before the producer is paused
    #[serde(default = "default_max_audio_frames")]
    pub max_audio_frames: usize,

    /// Threshold multiplier while queued frames are rewritten for a speed change
    #[serde(default = "default_speed_transition_multiplier")]
    pub speed_transition_multiplier: usize,

    /// Backpressure poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Apply `filters` between the source and the tempo filter
    #[serde(default = "default_filters_enabled")]
    pub filters_enabled: bool,

    #[serde(default)]
    pub filters: Vec<FilterSpec>,

    /// Added to every output timestamp, in 100ns ticks
    #[serde(default)]
    pub delay_ticks: i64,

    #[serde(default = "default_output_sample_format")]
    pub output_sample_format: SampleFormat,

    /// Output sample rate; the stream's rate when unset
    #[serde(default)]
    pub output_sample_rate: Option<u32>,

    /// Frames worth of circular buffer; `max_audio_frames * speed_transition_multiplier` when unset
    #[serde(default)]
    pub buffer_slots: Option<usize>,

    #[serde(default = "default_initial_speed")]
    pub initial_speed: f64,
}

fn default_max_audio_frames() -> usize {
    10
}

fn default_speed_transition_multiplier() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_filters_enabled() -> bool {
    true
}

fn default_output_sample_format() -> SampleFormat {
    SampleFormat::S16
}

fn default_initial_speed() -> f64 {
    1.0
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_audio_frames: default_max_audio_frames(),
            speed_transition_multiplier: default_speed_transition_multiplier(),
            poll_interval_ms: default_poll_interval_ms(),
            filters_enabled: default_filters_enabled(),
            filters: Vec::new(),
            delay_ticks: 0,
            output_sample_format: default_output_sample_format(),
            output_sample_rate: None,
            buffer_slots: None,
            initial_speed: default_initial_speed(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        info!("Loaded pipeline configuration from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_audio_frames == 0 {
            return Err(PipelineError::Config("max_audio_frames must be > 0".into()));
        }
        if self.speed_transition_multiplier == 0 {
            return Err(PipelineError::Config("speed_transition_multiplier must be > 0".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(PipelineError::Config("poll_interval_ms must be > 0".into()));
        }
        if self.output_sample_format.is_planar() {
            return Err(PipelineError::Config(format!(
                "output_sample_format {} is planar",
                self.output_sample_format
            )));
        }
        if self.output_sample_rate == Some(0) {
            return Err(PipelineError::Config("output_sample_rate must be > 0".into()));
        }
        if self.buffer_slots == Some(0) {
            return Err(PipelineError::Config("buffer_slots must be > 0".into()));
        }
        if !is_valid_speed(self.initial_speed) {
            return Err(PipelineError::Config(format!("initial_speed {} outside the tempo range", self.initial_speed)));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn buffer_slots(&self) -> usize {
        self.buffer_slots
            .unwrap_or(self.max_audio_frames * self.speed_transition_multiplier)
    }

    pub fn with_filters(mut self, filters: Vec<FilterSpec>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_max_audio_frames(mut self, max_audio_frames: usize) -> Self {
        self.max_audio_frames = max_audio_frames;
        self
    }
}
