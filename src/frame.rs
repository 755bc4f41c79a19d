//! Frame types flowing through the pipeline.

/// A decoded audio frame as handed over by the decoder.
///
/// Packed formats carry a single plane, planar formats one plane per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pub planes: Vec<Vec<u8>>,
    pub nb_samples: usize,
    /// Timestamp in the stream time base, if the decoder knew it
    pub pts: Option<i64>,
}

impl RawFrame {
    /// A packed (interleaved) frame.
    pub fn packed(data: Vec<u8>, nb_samples: usize, pts: Option<i64>) -> Self {
        Self {
            planes: vec![data],
            nb_samples,
            pts,
        }
    }

    /// A planar frame, one plane per channel.
    pub fn planar(planes: Vec<Vec<u8>>, nb_samples: usize, pts: Option<i64>) -> Self {
        Self {
            planes,
            nb_samples,
            pts,
        }
    }
}

/// Interleaved f32 samples exchanged between filter nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBlock {
    pub samples: Vec<f32>,
    pub channels: usize,
    pub pts: Option<i64>,
}

impl SampleBlock {
    pub fn new(samples: Vec<f32>, channels: usize, pts: Option<i64>) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            pts,
        }
    }

    /// Number of samples per channel.
    #[inline]
    pub fn nb_samples(&self) -> usize {
        self.samples.len() / self.channels
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A frame as delivered by the sink: packed bytes in the output format.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkFrame {
    pub data: Vec<u8>,
    pub nb_samples: usize,
    pub pts: Option<i64>,
}

/// A view into the [`CircularBuffer`](crate::CircularBuffer).
///
/// The descriptor does not own its bytes. It stays valid until the buffer
/// wraps past its region or is reallocated; reads through the buffer check
/// `generation` and `lap` and report a stale frame instead of returning
/// overwritten audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AudioFrame {
    /// Byte offset inside the buffer
    pub offset: usize,
    /// Byte length of the payload
    pub len: usize,
    /// Presentation timestamp in ticks (100ns)
    pub timestamp: i64,
    /// Buffer allocation this frame was written into
    pub generation: u64,
    /// Wrap count of the buffer when this frame was written
    pub lap: u64,
}
