//! Error types.
//!
//! Filter construction and command failures are reported as [`FilterError`];
//! everything the pipeline surfaces to its owner is a [`PipelineError`].

use thiserror::Error;

/// Errors raised while building, configuring or commanding a filter graph.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    /// No filter with this name is registered
    #[error("[Filter {0}] not found")]
    NotFound(String),

    /// The argument string could not be applied to the filter
    #[error("[Filter {filter}] invalid argument: {reason}")]
    InvalidArgument { filter: String, reason: String },

    /// A node with the same id already exists in the graph
    #[error("[Filter {0}] duplicate node id")]
    DuplicateId(String),

    /// No node with this id exists in the graph
    #[error("[Filter {0}] no such node")]
    UnknownNode(String),

    /// Two nodes could not be linked
    #[error("[Filter {to}] link from {from} failed: {reason}")]
    Link {
        from: String,
        to: String,
        reason: String,
    },

    /// Graph configuration (topology or format negotiation) failed
    #[error("[FilterGraph] {0}")]
    Config(String),

    /// A runtime command was rejected by the node
    #[error("[{node}] {key}={value} rejected")]
    Command {
        node: String,
        key: String,
        value: String,
    },

    /// The node's message queue is full
    #[error("[{0}] command queue full")]
    QueueFull(String),

    /// The source refused an input frame
    #[error("[buffersrc] {0}")]
    SourceRejected(String),
}

/// Errors surfaced by [`AudioPipeline`](crate::AudioPipeline).
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Filter graph errors
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The operation needs a built filter graph
    #[error("Filter graph not built")]
    NotBuilt,

    /// Filters are disabled or the filter backend lacks the mandatory filters
    #[error("Filters not available for this pipeline")]
    FiltersUnavailable,

    /// Speed outside the tempo range (0.5 to 100)
    #[error("Invalid speed: {0}")]
    InvalidSpeed(f64),

    /// The frame's bytes were overwritten by a buffer wrap or reallocation
    #[error("Frame is no longer backed by the sample buffer")]
    StaleFrame,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output device errors
    #[cfg(feature = "cpal_sink")]
    #[error("Audio device error: {0}")]
    Device(String),

    /// TOML parse errors
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Convenience Result type using [`PipelineError`]
pub type Result<T> = std::result::Result<T, PipelineError>;
