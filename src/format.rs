//! Sample formats, channel layouts and time bases.

use core::fmt;
use core::str::FromStr;

use dasp_sample::Sample;
use serde::{Deserialize, Serialize};

/// Presentation timestamps are expressed in ticks of 100ns.
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Time base of presentation timestamps (1 tick = 100ns).
pub const TICK_TIME_BASE: Rational = Rational::new(1, TICKS_PER_SECOND);

/// A rational number, used for time bases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| format!("expected num/den, got {:?}", s))?;
        let num = num.trim().parse().map_err(|_| format!("bad numerator in {:?}", s))?;
        let den: i64 = den.trim().parse().map_err(|_| format!("bad denominator in {:?}", s))?;
        if den == 0 {
            return Err(format!("zero denominator in {:?}", s));
        }
        Ok(Self::new(num, den))
    }
}

/// Rescale `value` from time base `from` to time base `to`.
///
/// Rounds to the nearest integer, halfway cases away from zero.
pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
    let mut num = value as i128 * from.num as i128 * to.den as i128;
    let mut den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    if den < 0 {
        num = -num;
        den = -den;
    }

    let rounded = if num >= 0 {
        (num + den / 2) / den
    } else {
        (num - den / 2) / den
    };

    rounded.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Rescale `value` from time base `from` to time base `to`, truncating
/// toward zero.
pub fn rescale_truncate(value: i64, from: Rational, to: Rational) -> i64 {
    let num = value as i128 * from.num as i128 * to.den as i128;
    let den = from.den as i128 * to.num as i128;
    if den == 0 {
        return 0;
    }
    (num / den).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub fn align(value: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return value;
    }
    match value % alignment {
        0 => value,
        rem => value + (alignment - rem),
    }
}

/// PCM sample formats, named as FFmpeg names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    #[serde(rename = "u8")]
    U8,
    #[serde(rename = "s16")]
    S16,
    #[serde(rename = "s32")]
    S32,
    #[serde(rename = "flt")]
    F32,
    #[serde(rename = "dbl")]
    F64,
    #[serde(rename = "u8p")]
    U8P,
    #[serde(rename = "s16p")]
    S16P,
    #[serde(rename = "s32p")]
    S32P,
    #[serde(rename = "fltp")]
    F32P,
    #[serde(rename = "dblp")]
    F64P,
}

impl SampleFormat {
    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::S16 => "s16",
            SampleFormat::S32 => "s32",
            SampleFormat::F32 => "flt",
            SampleFormat::F64 => "dbl",
            SampleFormat::U8P => "u8p",
            SampleFormat::S16P => "s16p",
            SampleFormat::S32P => "s32p",
            SampleFormat::F32P => "fltp",
            SampleFormat::F64P => "dblp",
        }
    }

    /// Bytes used by a single sample of a single channel.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::U8P => 1,
            SampleFormat::S16 | SampleFormat::S16P => 2,
            SampleFormat::S32 | SampleFormat::S32P | SampleFormat::F32 | SampleFormat::F32P => 4,
            SampleFormat::F64 | SampleFormat::F64P => 8,
        }
    }

    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            SampleFormat::U8P
                | SampleFormat::S16P
                | SampleFormat::S32P
                | SampleFormat::F32P
                | SampleFormat::F64P
        )
    }

    /// The interleaved counterpart of this format.
    pub fn packed(&self) -> SampleFormat {
        match self {
            SampleFormat::U8P => SampleFormat::U8,
            SampleFormat::S16P => SampleFormat::S16,
            SampleFormat::S32P => SampleFormat::S32,
            SampleFormat::F32P => SampleFormat::F32,
            SampleFormat::F64P => SampleFormat::F64,
            packed => *packed,
        }
    }

    /// Read one sample at `bytes[..bytes_per_sample]` as f32.
    #[inline]
    pub fn read_sample(&self, bytes: &[u8]) -> f32 {
        match self.packed() {
            SampleFormat::U8 => bytes[0].to_sample::<f32>(),
            SampleFormat::S16 => i16::from_le_bytes([bytes[0], bytes[1]]).to_sample::<f32>(),
            SampleFormat::S32 => {
                i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]).to_sample::<f32>()
            }
            SampleFormat::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            _ => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&bytes[..8]);
                f64::from_le_bytes(raw).to_sample::<f32>()
            }
        }
    }

    /// Append `sample` to `out` in this format's packed encoding.
    #[inline]
    pub fn write_sample(&self, sample: f32, out: &mut Vec<u8>) {
        let sample = sample.clamp(-1.0, 1.0);
        match self.packed() {
            SampleFormat::U8 => out.push(sample.to_sample::<u8>()),
            SampleFormat::S16 => out.extend_from_slice(&sample.to_sample::<i16>().to_le_bytes()),
            SampleFormat::S32 => out.extend_from_slice(&sample.to_sample::<i32>().to_le_bytes()),
            SampleFormat::F32 => out.extend_from_slice(&sample.to_le_bytes()),
            _ => out.extend_from_slice(&sample.to_sample::<f64>().to_le_bytes()),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SampleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "u8" => SampleFormat::U8,
            "s16" => SampleFormat::S16,
            "s32" => SampleFormat::S32,
            "flt" | "f32" => SampleFormat::F32,
            "dbl" | "f64" => SampleFormat::F64,
            "u8p" => SampleFormat::U8P,
            "s16p" => SampleFormat::S16P,
            "s32p" => SampleFormat::S32P,
            "fltp" | "f32p" => SampleFormat::F32P,
            "dblp" | "f64p" => SampleFormat::F64P,
            other => return Err(format!("unknown sample format {:?}", other)),
        })
    }
}

/// Channel layouts, named as FFmpeg names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Surround21,
    Quad,
    Surround50,
    Surround51,
    Surround71,
    /// Only the channel count is known
    Unspecified(u16),
}

impl ChannelLayout {
    pub fn channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Surround21 => 3,
            ChannelLayout::Quad => 4,
            ChannelLayout::Surround50 => 5,
            ChannelLayout::Surround51 => 6,
            ChannelLayout::Surround71 => 8,
            ChannelLayout::Unspecified(n) => *n as usize,
        }
    }

    /// The default layout for a channel count.
    pub fn from_channels(channels: usize) -> Self {
        match channels {
            1 => ChannelLayout::Mono,
            2 => ChannelLayout::Stereo,
            3 => ChannelLayout::Surround21,
            4 => ChannelLayout::Quad,
            5 => ChannelLayout::Surround50,
            6 => ChannelLayout::Surround51,
            8 => ChannelLayout::Surround71,
            n => ChannelLayout::Unspecified(n.min(u16::MAX as usize) as u16),
        }
    }
}

impl fmt::Display for ChannelLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelLayout::Mono => f.write_str("mono"),
            ChannelLayout::Stereo => f.write_str("stereo"),
            ChannelLayout::Surround21 => f.write_str("2.1"),
            ChannelLayout::Quad => f.write_str("quad"),
            ChannelLayout::Surround50 => f.write_str("5.0"),
            ChannelLayout::Surround51 => f.write_str("5.1"),
            ChannelLayout::Surround71 => f.write_str("7.1"),
            ChannelLayout::Unspecified(n) => write!(f, "{}c", n),
        }
    }
}

impl FromStr for ChannelLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mono" => ChannelLayout::Mono,
            "stereo" => ChannelLayout::Stereo,
            "2.1" => ChannelLayout::Surround21,
            "quad" => ChannelLayout::Quad,
            "5.0" => ChannelLayout::Surround50,
            "5.1" => ChannelLayout::Surround51,
            "7.1" => ChannelLayout::Surround71,
            other => {
                let count = other
                    .strip_suffix('c')
                    .and_then(|n| n.parse::<u16>().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| format!("unknown channel layout {:?}", other))?;
                ChannelLayout::from_channels(count as usize)
            }
        })
    }
}

impl TryFrom<String> for ChannelLayout {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelLayout> for String {
    fn from(layout: ChannelLayout) -> Self {
        layout.to_string()
    }
}

/// Description of the incoming decoded audio stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub sample_format: SampleFormat,
    /// Time base the decoder counts samples in (usually 1/sample_rate)
    pub codec_time_base: Rational,
    /// Time base of input frame timestamps
    pub stream_time_base: Rational,
    /// Demuxer start offset in ticks
    pub start_time: i64,
}

impl StreamInfo {
    /// Stream whose codec and stream time bases are both `1/sample_rate`.
    pub fn new(sample_rate: u32, channel_layout: ChannelLayout, sample_format: SampleFormat) -> Self {
        let time_base = Rational::new(1, sample_rate.max(1) as i64);
        Self {
            sample_rate,
            channel_layout,
            sample_format,
            codec_time_base: time_base,
            stream_time_base: time_base,
            start_time: 0,
        }
    }

    pub fn with_stream_time_base(mut self, time_base: Rational) -> Self {
        self.stream_time_base = time_base;
        self
    }

    pub fn with_start_time(mut self, start_time: i64) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn channels(&self) -> usize {
        self.channel_layout.channels()
    }

    /// Argument string for the `abuffer` source.
    pub fn source_args(&self) -> String {
        format!(
            "channel_layout={}:sample_fmt={}:sample_rate={}:time_base={}",
            self.channel_layout, self.sample_format, self.sample_rate, self.codec_time_base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescale_rounds_half_away_from_zero() {
        let from = Rational::new(1, 4);
        let to = Rational::new(1, 2);
        assert_eq!(rescale(1, from, to), 1); // 0.5 -> 1
        assert_eq!(rescale(-1, from, to), -1);
        assert_eq!(rescale(44100, Rational::new(1, 44100), TICK_TIME_BASE), TICKS_PER_SECOND);
    }

    #[test]
    fn rescale_truncate_drops_the_fraction() {
        let third = Rational::new(1, 3);
        assert_eq!(rescale_truncate(2, third, TICK_TIME_BASE), 6_666_666);
        assert_eq!(rescale(2, third, TICK_TIME_BASE), 6_666_667);
        assert_eq!(rescale_truncate(-2, third, TICK_TIME_BASE), -6_666_666);
        assert_eq!(rescale_truncate(1, Rational::new(1, 0), TICK_TIME_BASE), 0);
    }

    #[test]
    fn align_rounds_up() {
        assert_eq!(align(0, 4), 0);
        assert_eq!(align(4, 4), 4);
        assert_eq!(align(2046, 4), 2048);
        assert_eq!(align(7, 0), 7);
    }

    #[test]
    fn layout_names_round_trip() {
        for name in ["mono", "stereo", "2.1", "quad", "5.0", "5.1", "7.1", "3c"] {
            let layout: ChannelLayout = name.parse().unwrap();
            assert_eq!(layout.to_string(), name);
        }
        assert!("0c".parse::<ChannelLayout>().is_err());
    }

    #[test]
    fn s16_sample_conversion() {
        let mut out = Vec::new();
        SampleFormat::S16.write_sample(0.5, &mut out);
        let back = SampleFormat::S16.read_sample(&out);
        assert!((back - 0.5).abs() < 1e-4);
        assert_eq!(SampleFormat::F32P.packed(), SampleFormat::F32);
        assert!(SampleFormat::S16P.is_planar());
    }

    #[test]
    fn source_args_format() {
        let info = StreamInfo::new(48000, ChannelLayout::Stereo, SampleFormat::F32P);
        assert_eq!(
            info.source_args(),
            "channel_layout=stereo:sample_fmt=fltp:sample_rate=48000:time_base=1/48000"
        );
    }
}
