//! `atempo` - change playback speed without changing pitch
//!
//! Overlap-add time stretching: Hann windowed segments of ~30ms are read
//! from the input every `hop * tempo` samples and summed into the output
//! every `hop` samples, with `hop` half the window length.

use tracing::trace;

use crate::error::FilterError;
use crate::frame::SampleBlock;
use crate::node::{FilterNode, ProcessContext};
use crate::nodes::FilterArgs;

pub const MIN_TEMPO: f64 = 0.5;
pub const MAX_TEMPO: f64 = 100.0;

/// Window length in seconds
const WINDOW_SECONDS: f64 = 0.03;

/// Messages to control tempo
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TempoMessage {
    SetTempo(f64),
}

/// Time stretcher for tempo factors in `[0.5, 100]`.
///
/// At exactly 1.0 blocks pass through bit-exact. Switching to 1.0 flushes
/// whatever the stretcher still holds first, so no audio is dropped.
#[derive(Clone, Debug)]
pub struct Tempo {
    tempo: f64,
    channels: usize,
    /// Window length in sample frames
    window_len: usize,
    window: Vec<f32>,
    /// Unconsumed interleaved input
    input: Vec<f32>,
    /// Read position of the next segment, in frames relative to `input`
    analysis_pos: f64,
    /// Overlap-add accumulator, `window_len` frames
    accum: Vec<f32>,
    /// A segment has been added since the last flush
    primed: bool,
    /// Output frames owed for the input received since the last flush
    expected_out: f64,
    produced: usize,
    last_pts: Option<i64>,
}

impl Tempo {
    pub fn new(tempo: f64) -> Result<Self, String> {
        check_tempo(tempo)?;
        Ok(Self {
            tempo,
            channels: 0,
            window_len: 0,
            window: Vec::new(),
            input: Vec::new(),
            analysis_pos: 0.0,
            accum: Vec::new(),
            primed: false,
            expected_out: 0.0,
            produced: 0,
            last_pts: None,
        })
    }

    /// Build from an `atempo` argument string.
    pub fn from_args(mut args: FilterArgs) -> Result<Self, FilterError> {
        let tempo = args.take_parsed::<f64>(&["tempo"])?.unwrap_or(1.0);
        let tempo = Self::new(tempo).map_err(|reason| args.invalid(reason))?;
        args.finish()?;
        Ok(tempo)
    }

    #[inline]
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    #[inline]
    fn hop(&self) -> usize {
        self.window_len / 2
    }

    fn is_idle(&self) -> bool {
        !self.primed && self.input.is_empty()
    }

    fn set_tempo(&mut self, tempo: f64, pts: Option<i64>, output: &mut Vec<SampleBlock>) {
        if tempo == self.tempo {
            return;
        }
        trace!("atempo: {} -> {}", self.tempo, tempo);
        if tempo == 1.0 {
            self.flush(pts, output);
        }
        self.tempo = tempo;
    }

    /// Add one windowed segment at `analysis_pos` and return the finished hop.
    fn overlap_add(&mut self, out: &mut Vec<f32>) {
        let ch = self.channels;
        let hop = self.hop();
        let start = self.analysis_pos as usize;

        for i in 0..self.window_len {
            // The very first segment has no predecessor to cross-fade with
            let w = if !self.primed && i < hop { 1.0 } else { self.window[i] };
            let src = (start + i) * ch;
            for c in 0..ch {
                let s = self.input.get(src + c).copied().unwrap_or(0.0);
                self.accum[i * ch + c] += s * w;
            }
        }
        self.primed = true;

        out.extend_from_slice(&self.accum[..hop * ch]);
        self.accum.drain(..hop * ch);
        self.accum.resize(self.window_len * ch, 0.0);

        self.analysis_pos += hop as f64 * self.tempo;
    }

    /// Drop input that no further segment will read.
    fn discard_consumed(&mut self) {
        let frames = self.input.len() / self.channels;
        let drop = (self.analysis_pos.floor() as usize).min(frames);
        self.input.drain(..drop * self.channels);
        self.analysis_pos -= drop as f64;
    }

    fn emit(&mut self, samples: Vec<f32>, pts: Option<i64>, output: &mut Vec<SampleBlock>) {
        if samples.is_empty() {
            return;
        }
        self.produced += samples.len() / self.channels;
        output.push(SampleBlock::new(samples, self.channels, pts));
    }

    fn stretch(&mut self, pts: Option<i64>, output: &mut Vec<SampleBlock>) {
        let mut out = Vec::new();
        while self.analysis_pos as usize + self.window_len <= self.input.len() / self.channels {
            self.overlap_add(&mut out);
        }
        self.discard_consumed();
        self.emit(out, pts, output);
    }

    /// Emit everything still held, trimmed to the owed output length.
    fn flush(&mut self, pts: Option<i64>, output: &mut Vec<SampleBlock>) {
        if self.is_idle() || self.channels == 0 {
            return;
        }

        let mut out = Vec::new();
        while (self.analysis_pos as usize) < self.input.len() / self.channels {
            self.overlap_add(&mut out);
        }
        out.extend_from_slice(&self.accum[..self.hop() * self.channels]);

        let owed = (self.expected_out.round() as usize).saturating_sub(self.produced);
        out.truncate(owed * self.channels);
        self.emit(out, pts, output);

        self.input.clear();
        self.accum.iter_mut().for_each(|s| *s = 0.0);
        self.analysis_pos = 0.0;
        self.primed = false;
        self.expected_out = 0.0;
        self.produced = 0;
    }
}

fn check_tempo(tempo: f64) -> Result<(), String> {
    if (MIN_TEMPO..=MAX_TEMPO).contains(&tempo) {
        Ok(())
    } else {
        Err(format!("tempo {} out of range [{}, {}]", tempo, MIN_TEMPO, MAX_TEMPO))
    }
}

impl FilterNode for Tempo {
    type Message = TempoMessage;

    fn configure(&mut self, input: ProcessContext) -> Result<ProcessContext, String> {
        if input.channels == 0 || input.sample_rate == 0 {
            return Err("unknown input format".into());
        }
        self.channels = input.channels;
        self.window_len = ((input.sample_rate as f64 * WINDOW_SECONDS) as usize).max(16) & !1;

        // Periodic Hann: windows spaced by half their length sum to one
        let n = self.window_len as f32;
        self.window = (0..self.window_len)
            .map(|i| 0.5 - 0.5 * (2.0 * core::f32::consts::PI * i as f32 / n).cos())
            .collect();
        self.accum = vec![0.0; self.window_len * self.channels];
        Ok(input)
    }

    fn parse_command(&self, key: &str, value: &str) -> Option<TempoMessage> {
        match key {
            "tempo" => {
                let tempo: f64 = value.trim().parse().ok()?;
                check_tempo(tempo).ok().map(|_| TempoMessage::SetTempo(tempo))
            }
            _ => None,
        }
    }

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = TempoMessage>,
        input: Option<SampleBlock>,
        output: &mut Vec<SampleBlock>,
    ) {
        for msg in messages {
            match msg {
                TempoMessage::SetTempo(tempo) => self.set_tempo(tempo, self.last_pts, output),
            }
        }

        let block = match input {
            Some(block) => block,
            None => return self.flush(self.last_pts, output),
        };
        if block.pts.is_some() {
            self.last_pts = block.pts;
        }

        if self.tempo == 1.0 && self.is_idle() {
            output.push(block);
            return;
        }

        self.expected_out += block.nb_samples() as f64 / self.tempo;
        self.input.extend_from_slice(&block.samples);
        self.stretch(self.last_pts, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 8000;

    fn tempo(value: f64) -> Tempo {
        let mut node = Tempo::new(value).unwrap();
        node.configure(ProcessContext { sample_rate: RATE, channels: 1 }).unwrap();
        node
    }

    fn run(node: &mut Tempo, blocks: usize, len: usize) -> Vec<SampleBlock> {
        let ctx = ProcessContext { sample_rate: RATE, channels: 1 };
        let mut out = Vec::new();
        for i in 0..blocks {
            let block = SampleBlock::new(vec![0.5; len], 1, Some((i * len) as i64));
            node.process(&ctx, core::iter::empty(), Some(block), &mut out);
        }
        node.process(&ctx, core::iter::empty(), None, &mut out);
        out
    }

    fn total(blocks: &[SampleBlock]) -> usize {
        blocks.iter().map(SampleBlock::nb_samples).sum()
    }

    #[test]
    fn unity_tempo_is_bit_exact() {
        let mut node = tempo(1.0);
        let ctx = ProcessContext { sample_rate: RATE, channels: 1 };
        let block = SampleBlock::new(vec![0.1, 0.2, -0.3], 1, Some(42));
        let mut out = Vec::new();
        node.process(&ctx, core::iter::empty(), Some(block.clone()), &mut out);
        assert_eq!(out, vec![block]);
    }

    #[test]
    fn double_speed_halves_output() {
        let out = run(&mut tempo(2.0), 10, 800);
        let produced = total(&out) as i64;
        assert!((produced - 4000).abs() <= 2, "produced {}", produced);
    }

    #[test]
    fn half_speed_doubles_output() {
        let out = run(&mut tempo(0.5), 10, 800);
        let produced = total(&out) as i64;
        assert!((produced - 16000).abs() <= 2, "produced {}", produced);
    }

    #[test]
    fn constant_signal_keeps_its_level() {
        let out = run(&mut tempo(1.5), 10, 800);
        let samples: Vec<f32> = out.iter().flat_map(|b| b.samples.iter().copied()).collect();
        // Ignore the fade out of the final segment
        for s in &samples[..samples.len() - 200] {
            assert!((s - 0.5).abs() < 1e-3, "sample {}", s);
        }
    }

    #[test]
    fn switching_to_unity_flushes() {
        let ctx = ProcessContext { sample_rate: RATE, channels: 1 };
        let mut node = tempo(2.0);
        let mut out = Vec::new();
        node.process(&ctx, core::iter::empty(), Some(SampleBlock::new(vec![0.5; 100], 1, Some(0))), &mut out);
        assert!(out.is_empty());

        let msg = node.parse_command("tempo", "1.0").unwrap();
        node.process(&ctx, core::iter::once(msg), None, &mut out);
        assert_eq!(total(&out), 50);
        assert!(node.is_idle());
    }

    #[test]
    fn rejects_out_of_range_tempo() {
        assert!(Tempo::new(0.25).is_err());
        assert!(Tempo::new(101.0).is_err());
        let node = tempo(1.0);
        assert!(node.parse_command("tempo", "0.1").is_none());
        assert!(node.parse_command("tempo", "fast").is_none());
        assert!(node.parse_command("speed", "2").is_none());
        assert_eq!(node.parse_command("tempo", "2.00"), Some(TempoMessage::SetTempo(2.0)));
    }
}
