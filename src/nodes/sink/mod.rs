//! Graph outputs

mod buffer_sink;

pub use buffer_sink::BufferSink;
