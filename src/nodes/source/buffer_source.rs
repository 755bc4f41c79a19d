//! `abuffer` - the entry point of every filter graph

use tracing::trace;

use crate::error::FilterError;
use crate::format::{ChannelLayout, Rational, SampleFormat};
use crate::frame::{RawFrame, SampleBlock};
use crate::node::ProcessContext;
use crate::nodes::FilterArgs;

/// Converts decoded frames into interleaved f32 blocks.
///
/// Parameterized with the incoming stream's channel layout, sample format,
/// sample rate and time base. Once end of input has been signalled every
/// further frame is rejected.
#[derive(Debug)]
pub struct BufferSource {
    channel_layout: ChannelLayout,
    sample_format: SampleFormat,
    sample_rate: u32,
    time_base: Rational,
    eof: bool,
}

impl BufferSource {
    pub fn new(channel_layout: ChannelLayout, sample_format: SampleFormat, sample_rate: u32, time_base: Rational) -> Self {
        Self {
            channel_layout,
            sample_format,
            sample_rate,
            time_base,
            eof: false,
        }
    }

    /// Build from an `abuffer` argument string.
    pub fn from_args(mut args: FilterArgs) -> Result<Self, FilterError> {
        let sample_rate: u32 = args.require(&["sample_rate"])?;
        if sample_rate == 0 {
            return Err(args.invalid("sample_rate must be > 0"));
        }
        let sample_format: SampleFormat = args.require(&["sample_fmt"])?;
        let channels: Option<usize> = args.take_parsed(&["channels"])?;
        let channel_layout = match args.take_parsed::<ChannelLayout>(&["channel_layout"])? {
            Some(layout) => layout,
            None => ChannelLayout::from_channels(
                channels.ok_or_else(|| args.invalid("missing option channel_layout"))?,
            ),
        };
        if let Some(n) = channels {
            if n != channel_layout.channels() {
                return Err(args.invalid(format!("{} channels do not match layout {}", n, channel_layout)));
            }
        }
        let time_base = args
            .take_parsed::<Rational>(&["time_base"])?
            .unwrap_or_else(|| Rational::new(1, sample_rate as i64));

        args.finish()?;
        Ok(Self::new(channel_layout, sample_format, sample_rate, time_base))
    }

    pub fn output_format(&self) -> ProcessContext {
        ProcessContext {
            sample_rate: self.sample_rate,
            channels: self.channel_layout.channels(),
        }
    }

    #[inline]
    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    /// Accept a decoded frame, or `None` to signal end of input.
    pub fn add_frame(&mut self, frame: Option<RawFrame>) -> Result<Option<SampleBlock>, FilterError> {
        if self.eof {
            return Err(FilterError::SourceRejected("frame after end of input".into()));
        }

        let frame = match frame {
            Some(frame) => frame,
            None => {
                trace!("abuffer: end of input");
                self.eof = true;
                return Ok(None);
            }
        };

        let channels = self.channel_layout.channels();
        let bps = self.sample_format.bytes_per_sample();
        let mut samples = Vec::with_capacity(frame.nb_samples * channels);

        if self.sample_format.is_planar() {
            if frame.planes.len() != channels {
                return Err(FilterError::SourceRejected(format!(
                    "expected {} planes, got {}",
                    channels,
                    frame.planes.len()
                )));
            }
            if frame.planes.iter().any(|p| p.len() < frame.nb_samples * bps) {
                return Err(FilterError::SourceRejected("plane shorter than nb_samples".into()));
            }
            for i in 0..frame.nb_samples {
                for plane in &frame.planes {
                    samples.push(self.sample_format.read_sample(&plane[i * bps..]));
                }
            }
        } else {
            let data = match frame.planes.first() {
                Some(data) if data.len() >= frame.nb_samples * channels * bps => data,
                _ => return Err(FilterError::SourceRejected("data shorter than nb_samples".into())),
            };
            samples.extend(
                data[..frame.nb_samples * channels * bps]
                    .chunks_exact(bps)
                    .map(|raw| self.sample_format.read_sample(raw)),
            );
        }

        Ok(Some(SampleBlock::new(samples, channels, frame.pts)))
    }
}
