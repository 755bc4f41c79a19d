//! Filters between the source and the sink

mod biquad;
mod null;
mod tempo;
mod volume;

pub use biquad::{Biquad, BiquadKind, BiquadMessage};
pub use null::Null;
pub use tempo::{Tempo, TempoMessage, MAX_TEMPO, MIN_TEMPO};
pub use volume::{Volume, VolumeMessage};
