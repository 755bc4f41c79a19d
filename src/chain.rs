//! The pipeline's filter chain: `abuffer -> user filters -> atempo -> abuffersink`

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::FilterError;
use crate::format::{ChannelLayout, SampleFormat, StreamInfo};
use crate::frame::{RawFrame, SinkFrame};
use crate::graph::{FilterGraph, PullError};
use crate::nodes::FilterRegistry;

pub const SOURCE_ID: &str = "abuffer";
pub const TEMPO_ID: &str = "atempo";
pub const SINK_ID: &str = "abuffersink";

/// A user filter: registry `name`, argument string and optional node id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: String,
}

impl FilterSpec {
    pub fn new(name: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            args: args.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Node id, defaulting to the filter name.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Fixed output format enforced by the sink.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SinkConstraints {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub channel_layout: ChannelLayout,
    pub all_channel_counts: bool,
}

impl SinkConstraints {
    /// Stereo output in `sample_format` at `sample_rate`.
    pub fn stereo(sample_format: SampleFormat, sample_rate: u32) -> Self {
        Self {
            sample_format,
            sample_rate,
            channel_layout: ChannelLayout::Stereo,
            all_channel_counts: false,
        }
    }

    /// Bytes per output sample frame.
    pub fn frame_bytes(&self) -> usize {
        self.sample_format.packed().bytes_per_sample() * self.channel_layout.channels()
    }

    /// Argument string for the `abuffersink`.
    pub fn args(&self) -> String {
        format!(
            "sample_fmts={}:sample_rates={}:ch_layouts={}:all_channel_counts={}",
            self.sample_format,
            self.sample_rate,
            self.channel_layout,
            self.all_channel_counts as u8
        )
    }
}

/// A built and configured filter chain.
///
/// Either fully built or not at all: a failure in the mandatory part drops
/// every node created so far.
pub struct FilterChain {
    graph: FilterGraph,
    user_ids: Vec<String>,
}

impl FilterChain {
    pub fn build(
        info: &StreamInfo,
        constraints: &SinkConstraints,
        filters: &[FilterSpec],
        speed: f64,
        registry: &FilterRegistry,
    ) -> Result<Self, FilterError> {
        let mut graph = FilterGraph::new();

        registry
            .create("abuffer", &info.source_args())
            .and_then(|source| graph.add(SOURCE_ID, source))
            .map_err(|e| log_build_error("abuffer", e))?;

        let mut last = SOURCE_ID.to_string();
        let mut user_ids = Vec::with_capacity(filters.len());
        for spec in filters {
            match Self::link_user_filter(&mut graph, registry, &last, spec) {
                Ok(()) => {
                    last = spec.id().to_string();
                    user_ids.push(last.clone());
                }
                Err(e) => error!("Skipping filter {} ({}): {}", spec.id(), spec.name, e),
            }
        }

        registry
            .create("atempo", &format!("tempo={:.2}", speed))
            .and_then(|tempo| graph.add(TEMPO_ID, tempo))
            .and_then(|_| graph.link(&last, TEMPO_ID))
            .map_err(|e| log_build_error("atempo", e))?;

        registry
            .create("abuffersink", &constraints.args())
            .and_then(|sink| graph.add(SINK_ID, sink))
            .and_then(|_| graph.link(TEMPO_ID, SINK_ID))
            .map_err(|e| log_build_error("abuffersink", e))?;

        graph.configure().map_err(|e| log_build_error("graph", e))?;

        debug!("Filter chain ready: {}", graph.chain().join(" -> "));
        Ok(Self { graph, user_ids })
    }

    /// Add and link one user filter, removing it again if linking fails.
    fn link_user_filter(
        graph: &mut FilterGraph,
        registry: &FilterRegistry,
        last: &str,
        spec: &FilterSpec,
    ) -> Result<(), FilterError> {
        let id = spec.id();
        if [SOURCE_ID, TEMPO_ID, SINK_ID].contains(&id) {
            return Err(FilterError::DuplicateId(id.to_string()));
        }

        graph.add(id, registry.create(&spec.name, &spec.args)?)?;
        if let Err(e) = graph.link(last, id) {
            graph.remove(id)?;
            return Err(e);
        }
        Ok(())
    }

    /// Ids of the user filters that made it into the chain, in order.
    pub fn user_filters(&self) -> &[String] {
        &self.user_ids
    }

    /// Node ids from source to sink.
    pub fn chain(&self) -> Vec<&str> {
        self.graph.chain()
    }

    /// Send a runtime command to a node, logging the outcome.
    pub fn send_command(&mut self, id: &str, key: &str, value: &str) -> Result<(), FilterError> {
        let result = self.graph.send_command(id, key, value);
        info!(
            "[{}] {}={} {}",
            id,
            key,
            value,
            if result.is_ok() { "success" } else { "failed" }
        );
        result
    }

    pub fn push(&mut self, frame: Option<RawFrame>) -> Result<(), FilterError> {
        self.graph.push(frame)
    }

    pub fn pull(&mut self) -> Result<SinkFrame, PullError> {
        self.graph.pull()
    }
}

fn log_build_error(stage: &str, e: FilterError) -> FilterError {
    error!("Failed to set up {}: {}", stage, e);
    e
}
