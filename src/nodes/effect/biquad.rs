//! `lowpass` / `highpass` - second order filters (RBJ cookbook)

use crate::error::FilterError;
use crate::frame::SampleBlock;
use crate::node::{FilterNode, ProcessContext};
use crate::nodes::FilterArgs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiquadKind {
    LowPass,
    HighPass,
}

impl BiquadKind {
    fn default_frequency(self) -> f64 {
        match self {
            BiquadKind::LowPass => 500.0,
            BiquadKind::HighPass => 3000.0,
        }
    }
}

/// Messages to control a biquad
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BiquadMessage {
    SetFrequency(f64),
    SetQ(f64),
}

#[derive(Clone, Copy, Debug, Default)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

/// Transposed direct form II state for one channel
#[derive(Clone, Copy, Debug, Default)]
struct ChannelState {
    z1: f32,
    z2: f32,
}

#[derive(Clone, Debug)]
pub struct Biquad {
    kind: BiquadKind,
    frequency: f64,
    q: f64,
    sample_rate: u32,
    coeffs: Coefficients,
    state: Vec<ChannelState>,
}

impl Biquad {
    pub fn new(kind: BiquadKind, frequency: f64, q: f64) -> Self {
        Self {
            kind,
            frequency,
            q,
            sample_rate: 0,
            coeffs: Coefficients::default(),
            state: Vec::new(),
        }
    }

    pub fn lowpass(frequency: f64) -> Self {
        Self::new(BiquadKind::LowPass, frequency, core::f64::consts::FRAC_1_SQRT_2)
    }

    pub fn highpass(frequency: f64) -> Self {
        Self::new(BiquadKind::HighPass, frequency, core::f64::consts::FRAC_1_SQRT_2)
    }

    /// Build from a `lowpass` / `highpass` argument string (`f`, `w`).
    pub fn from_args(kind: BiquadKind, mut args: FilterArgs) -> Result<Self, FilterError> {
        let frequency = args
            .take_parsed::<f64>(&["f", "frequency"])?
            .unwrap_or_else(|| kind.default_frequency());
        let q = args
            .take_parsed::<f64>(&["w", "width", "q"])?
            .unwrap_or(core::f64::consts::FRAC_1_SQRT_2);
        if !(frequency > 0.0) {
            return Err(args.invalid(format!("frequency {} must be positive", frequency)));
        }
        if !(q > 0.0) {
            return Err(args.invalid(format!("width {} must be positive", q)));
        }
        args.finish()?;
        Ok(Self::new(kind, frequency, q))
    }

    #[inline]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    fn update_coefficients(&mut self) {
        if self.sample_rate == 0 {
            return;
        }
        let w0 = 2.0 * core::f64::consts::PI * self.frequency / self.sample_rate as f64;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * self.q);

        let (b0, b1, b2) = match self.kind {
            BiquadKind::LowPass => ((1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0),
            BiquadKind::HighPass => ((1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0),
        };
        let a0 = 1.0 + alpha;
        let a1 = -2.0 * cos;
        let a2 = 1.0 - alpha;

        self.coeffs = Coefficients {
            b0: (b0 / a0) as f32,
            b1: (b1 / a0) as f32,
            b2: (b2 / a0) as f32,
            a1: (a1 / a0) as f32,
            a2: (a2 / a0) as f32,
        };
    }

    fn nyquist_check(&self, frequency: f64) -> bool {
        self.sample_rate == 0 || frequency < self.sample_rate as f64 / 2.0
    }
}

impl FilterNode for Biquad {
    type Message = BiquadMessage;

    fn configure(&mut self, input: ProcessContext) -> Result<ProcessContext, String> {
        self.sample_rate = input.sample_rate;
        if !self.nyquist_check(self.frequency) {
            return Err(format!(
                "frequency {} not below nyquist at {} Hz",
                self.frequency, input.sample_rate
            ));
        }
        self.state = vec![ChannelState::default(); input.channels];
        self.update_coefficients();
        Ok(input)
    }

    fn parse_command(&self, key: &str, value: &str) -> Option<BiquadMessage> {
        let value: f64 = value.trim().parse().ok().filter(|v: &f64| *v > 0.0)?;
        match key {
            "f" | "frequency" if self.nyquist_check(value) => Some(BiquadMessage::SetFrequency(value)),
            "w" | "width" | "q" => Some(BiquadMessage::SetQ(value)),
            _ => None,
        }
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = BiquadMessage>,
        input: Option<SampleBlock>,
        output: &mut Vec<SampleBlock>,
    ) {
        let mut changed = false;
        for msg in messages {
            match msg {
                BiquadMessage::SetFrequency(f) => self.frequency = f,
                BiquadMessage::SetQ(q) => self.q = q,
            }
            changed = true;
        }
        if changed {
            self.update_coefficients();
        }

        let mut block = match input {
            Some(block) => block,
            None => return,
        };

        let c = self.coeffs;
        let channels = block.channels;
        for frame in block.samples.chunks_mut(channels) {
            for (x, st) in frame.iter_mut().zip(self.state.iter_mut()) {
                let y = c.b0 * *x + st.z1;
                st.z1 = c.b1 * *x - c.a1 * y + st.z2;
                st.z2 = c.b2 * *x - c.a2 * y;
                *x = y;
            }
        }
        output.push(block);
    }
}
