//! `abuffersink` - the exit point of every filter graph

use std::collections::VecDeque;

use crate::error::FilterError;
use crate::format::{ChannelLayout, SampleFormat};
use crate::frame::{SampleBlock, SinkFrame};
use crate::graph::PullError;
use crate::node::ProcessContext;
use crate::nodes::FilterArgs;

/// Collects filtered blocks and converts them to the output format.
///
/// Constraints mirror FFmpeg's buffersink options:
/// - `sample_fmts` - accepted output formats (`|` separated, the first is used)
/// - `sample_rates` - accepted rates; the negotiated rate must be one of them
/// - `ch_layouts` - forced output layout (blocks are up/down-mixed to it)
/// - `all_channel_counts` - accept any channel count when no layout is forced
#[derive(Debug)]
pub struct BufferSink {
    sample_format: SampleFormat,
    sample_rates: Vec<u32>,
    channel_layout: Option<ChannelLayout>,
    all_channel_counts: bool,
    /// Negotiated output channel count
    out_channels: usize,
    frames: VecDeque<SinkFrame>,
    eof: bool,
}

impl BufferSink {
    pub fn new(sample_format: SampleFormat, sample_rates: Vec<u32>, channel_layout: Option<ChannelLayout>) -> Self {
        Self {
            sample_format: sample_format.packed(),
            sample_rates,
            channel_layout,
            all_channel_counts: false,
            out_channels: 0,
            frames: VecDeque::new(),
            eof: false,
        }
    }

    /// Build from an `abuffersink` argument string.
    pub fn from_args(mut args: FilterArgs) -> Result<Self, FilterError> {
        let sample_format = match args.take(&["sample_fmts"]) {
            Some(list) => {
                let first = list.split('|').next().unwrap_or_default();
                let format: SampleFormat = first.parse().map_err(|e: String| args.invalid(e))?;
                if format.is_planar() {
                    return Err(args.invalid(format!("planar output format {} not supported", format)));
                }
                format
            }
            None => SampleFormat::S16,
        };

        let sample_rates = match args.take(&["sample_rates"]) {
            Some(list) => list
                .split('|')
                .map(|rate| rate.trim().parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| args.invalid(format!("invalid sample_rates {:?}", list)))?,
            None => Vec::new(),
        };

        let channel_layout = match args.take(&["ch_layouts", "channel_layouts"]) {
            Some(name) => Some(name.parse::<ChannelLayout>().map_err(|e| args.invalid(e))?),
            None => None,
        };

        let all_channel_counts = match args.take(&["all_channel_counts"]).as_deref() {
            None | Some("0") | Some("false") => false,
            Some("1") | Some("true") => true,
            Some(other) => return Err(args.invalid(format!("invalid all_channel_counts {:?}", other))),
        };

        args.finish()?;

        let mut sink = Self::new(sample_format, sample_rates, channel_layout);
        sink.all_channel_counts = all_channel_counts;
        Ok(sink)
    }

    #[inline]
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// Bytes per output sample frame (all channels), valid once configured.
    #[inline]
    pub fn frame_bytes(&self) -> usize {
        self.out_channels * self.sample_format.bytes_per_sample()
    }

    pub(crate) fn configure(&mut self, input: ProcessContext) -> Result<ProcessContext, String> {
        if !self.sample_rates.is_empty() && !self.sample_rates.contains(&input.sample_rate) {
            return Err(format!(
                "sample rate {} not accepted (expected one of {:?})",
                input.sample_rate, self.sample_rates
            ));
        }

        self.out_channels = match self.channel_layout {
            Some(layout) => layout.channels(),
            None if self.all_channel_counts => input.channels,
            None if input.channels > 0 => ChannelLayout::from_channels(input.channels).channels(),
            None => return Err("unknown channel count".into()),
        };

        Ok(ProcessContext {
            sample_rate: input.sample_rate,
            channels: self.out_channels,
        })
    }

    pub(crate) fn consume(&mut self, block: SampleBlock) {
        if block.is_empty() {
            return;
        }
        let nb_samples = block.nb_samples();
        let mixed = remix(&block.samples, block.channels, self.out_channels);

        let mut data = Vec::with_capacity(mixed.len() * self.sample_format.bytes_per_sample());
        for sample in mixed {
            self.sample_format.write_sample(sample, &mut data);
        }

        self.frames.push_back(SinkFrame {
            data,
            nb_samples,
            pts: block.pts,
        });
    }

    pub(crate) fn finish(&mut self) {
        self.eof = true;
    }

    pub(crate) fn next_frame(&mut self) -> Result<SinkFrame, PullError> {
        match self.frames.pop_front() {
            Some(frame) => Ok(frame),
            None if self.eof => Err(PullError::Eof),
            None => Err(PullError::Again),
        }
    }
}

/// Map interleaved `samples` from `in_ch` to `out_ch` channels.
///
/// Mono is duplicated; wider inputs fold onto the outputs round-robin
/// (even channels left, odd channels right for stereo) and are normalised
/// by the number of inputs folded into each output.
fn remix(samples: &[f32], in_ch: usize, out_ch: usize) -> Vec<f32> {
    if in_ch == out_ch || in_ch == 0 || out_ch == 0 {
        return samples.to_vec();
    }

    let frames = samples.len() / in_ch;
    let mut out = vec![0.0f32; frames * out_ch];

    if in_ch == 1 {
        for (frame, &s) in out.chunks_exact_mut(out_ch).zip(samples.iter()) {
            frame.iter_mut().for_each(|o| *o = s);
        }
        return out;
    }

    let mut folded = vec![0usize; out_ch];
    for ch in 0..in_ch {
        folded[ch % out_ch] += 1;
    }

    for (out_frame, in_frame) in out.chunks_exact_mut(out_ch).zip(samples.chunks_exact(in_ch)) {
        for (ch, &s) in in_frame.iter().enumerate() {
            out_frame[ch % out_ch] += s;
        }
        for (o, &n) in out_frame.iter_mut().zip(folded.iter()) {
            if n > 1 {
                *o /= n as f32;
            }
        }
    }
    out
}
