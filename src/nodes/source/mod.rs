//! Graph inputs

mod buffer_source;

pub use buffer_source::BufferSource;
