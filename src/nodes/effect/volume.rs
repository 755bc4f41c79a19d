//! `volume` - gain control

use crate::error::FilterError;
use crate::frame::SampleBlock;
use crate::node::{FilterNode, ProcessContext};
use crate::nodes::FilterArgs;

/// Messages to control volume
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VolumeMessage {
    /// Set the gain multiplier (1.0 = unity, 0.0 = silence)
    SetGain(f32),
}

/// Scales every sample by a gain factor.
///
/// Accepts either a linear factor (`0.5`) or a level in decibels (`-6dB`).
/// Gain changes received at runtime are smoothed to avoid clicks.
#[derive(Clone, Debug)]
pub struct Volume {
    gain: f32,
    smoothed_gain: f32,
    /// Smoothing coefficient (0.0 = instant, 1.0 = no change)
    smooth_coeff: f32,
}

impl Volume {
    pub fn new(gain: f32) -> Self {
        Self {
            gain,
            smoothed_gain: gain,
            smooth_coeff: 0.995, // ~7ms at 48kHz
        }
    }

    /// Build from a `volume` argument string.
    pub fn from_args(mut args: FilterArgs) -> Result<Self, FilterError> {
        let gain = match args.take(&["volume"]) {
            Some(raw) => parse_gain(&raw).ok_or_else(|| args.invalid(format!("invalid volume {:?}", raw)))?,
            None => 1.0,
        };
        args.finish()?;
        Ok(Self::new(gain))
    }

    /// Set the smoothing time in milliseconds
    pub fn with_smoothing_ms(mut self, ms: f32, sample_rate: u32) -> Self {
        let samples = (ms / 1000.0) * sample_rate as f32;
        self.smooth_coeff = if samples > 0.0 { (-1.0 / samples).exp() } else { 0.0 };
        self
    }

    /// Disable smoothing for instant gain changes
    pub fn without_smoothing(mut self) -> Self {
        self.smooth_coeff = 0.0;
        self
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

/// Parse `0.5`, `2` or `-6dB`.
fn parse_gain(raw: &str) -> Option<f32> {
    let raw = raw.trim();
    let gain = match raw.strip_suffix("dB").or_else(|| raw.strip_suffix("db")) {
        Some(db) => 10f32.powf(db.trim().parse::<f32>().ok()? / 20.0),
        None => raw.parse::<f32>().ok()?,
    };
    (gain.is_finite() && gain >= 0.0).then_some(gain)
}

impl FilterNode for Volume {
    type Message = VolumeMessage;

    fn parse_command(&self, key: &str, value: &str) -> Option<VolumeMessage> {
        match key {
            "volume" => parse_gain(value).map(VolumeMessage::SetGain),
            _ => None,
        }
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = VolumeMessage>,
        input: Option<SampleBlock>,
        output: &mut Vec<SampleBlock>,
    ) {
        for msg in messages {
            match msg {
                VolumeMessage::SetGain(g) => self.gain = g,
            }
        }

        let mut block = match input {
            Some(block) => block,
            None => return,
        };

        let target = self.gain;
        let coeff = self.smooth_coeff;
        let mut gain = self.smoothed_gain;
        let channels = block.channels;

        // One gain step per sample frame so all channels track together
        for frame in block.samples.chunks_mut(channels) {
            gain = target + coeff * (gain - target);
            frame.iter_mut().for_each(|s| *s *= gain);
        }

        self.smoothed_gain = gain;
        output.push(block);
    }
}
