//! Filter graph - owns nodes, links and message queues

use hashbrown::HashMap;
use itertools::Itertools;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::Direction;
use rtrb::{Consumer, Producer, RingBuffer};
use tracing::debug;

use crate::error::FilterError;
use crate::frame::{RawFrame, SampleBlock, SinkFrame};
use crate::node::{FilterNode, ProcessContext};
use crate::nodes::{BufferSink, BufferSource};

/// Size of each node's command queue
const COMMAND_QUEUE_SIZE: usize = 64;

/// Object-safe face of a [`FilterNode`] and its command queue.
trait ErasedNode: Send {
    fn configure(&mut self, input: ProcessContext) -> Result<ProcessContext, String>;
    fn command(&mut self, key: &str, value: &str) -> Result<(), CommandError>;
    fn process_erased(&mut self, ctx: &ProcessContext, input: Option<SampleBlock>, output: &mut Vec<SampleBlock>);
}

enum CommandError {
    Rejected,
    QueueFull,
}

struct NodeWrapper<N: FilterNode> {
    node: N,
    sender: Producer<N::Message>,
    receiver: Consumer<N::Message>,
}

impl<N: FilterNode> ErasedNode for NodeWrapper<N> {
    fn configure(&mut self, input: ProcessContext) -> Result<ProcessContext, String> {
        self.node.configure(input)
    }

    fn command(&mut self, key: &str, value: &str) -> Result<(), CommandError> {
        let msg = self.node.parse_command(key, value).ok_or(CommandError::Rejected)?;
        self.sender.push(msg).map_err(|_| CommandError::QueueFull)
    }

    fn process_erased(&mut self, ctx: &ProcessContext, input: Option<SampleBlock>, output: &mut Vec<SampleBlock>) {
        let receiver = &mut self.receiver;
        let node = &mut self.node;

        // Pending commands, oldest first
        let messages = core::iter::from_fn(|| receiver.pop().ok());
        node.process(ctx, messages, input, output);
    }
}

/// A filter ready to be added to a [`FilterGraph`].
///
/// Built by the [`FilterRegistry`](crate::FilterRegistry) from a name and an
/// argument string, or directly from a custom [`FilterNode`].
pub struct FilterInstance {
    slot: Slot,
}

enum Slot {
    Source(BufferSource),
    Filter(Box<dyn ErasedNode>),
    Sink(BufferSink),
}

impl FilterInstance {
    /// Wrap a [`FilterNode`] as an intermediate filter.
    pub fn filter<N: FilterNode>(node: N) -> Self {
        let (sender, receiver) = RingBuffer::new(COMMAND_QUEUE_SIZE);
        Self {
            slot: Slot::Filter(Box::new(NodeWrapper {
                node,
                sender,
                receiver,
            })),
        }
    }

    pub fn source(source: BufferSource) -> Self {
        Self {
            slot: Slot::Source(source),
        }
    }

    pub fn sink(sink: BufferSink) -> Self {
        Self {
            slot: Slot::Sink(sink),
        }
    }
}

/// Why [`FilterGraph::pull`] returned no frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullError {
    /// No output yet, feed more input
    Again,
    /// The stream has ended and everything has been pulled
    Eof,
}

struct GraphNode {
    id: String,
    slot: Slot,
    /// Input format, known once configured
    ctx: ProcessContext,
}

type InnerGraph = StableGraph<GraphNode, ()>;

/// A chain of filters from one `abuffer` source to one `abuffersink` sink.
///
/// Nodes are added under unique ids and linked one output to one input.
/// [`configure`](Self::configure) checks the topology and negotiates
/// formats; after that frames are pushed into the source and pulled out of
/// the sink.
pub struct FilterGraph {
    graph: InnerGraph,
    node_indices: HashMap<String, NodeIndex>,
    source: Option<NodeIndex>,
    sink: Option<NodeIndex>,
    /// Source to sink processing order, set by `configure`
    order: Vec<NodeIndex>,
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterGraph {
    pub fn new() -> Self {
        Self {
            graph: InnerGraph::with_capacity(16, 16),
            node_indices: HashMap::new(),
            source: None,
            sink: None,
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_indices.contains_key(id)
    }

    /// Add a node under a unique id.
    pub fn add(&mut self, id: &str, instance: FilterInstance) -> Result<(), FilterError> {
        if self.node_indices.contains_key(id) {
            return Err(FilterError::DuplicateId(id.to_string()));
        }
        match instance.slot {
            Slot::Source(_) if self.source.is_some() => {
                return Err(FilterError::Config(format!("second source {}", id)));
            }
            Slot::Sink(_) if self.sink.is_some() => {
                return Err(FilterError::Config(format!("second sink {}", id)));
            }
            _ => {}
        }

        let is_source = matches!(instance.slot, Slot::Source(_));
        let is_sink = matches!(instance.slot, Slot::Sink(_));

        let idx = self.graph.add_node(GraphNode {
            id: id.to_string(),
            slot: instance.slot,
            ctx: ProcessContext {
                sample_rate: 0,
                channels: 0,
            },
        });
        self.node_indices.insert(id.to_string(), idx);

        if is_source {
            self.source = Some(idx);
        }
        if is_sink {
            self.sink = Some(idx);
        }
        self.order.clear();
        Ok(())
    }

    /// Remove a node and its links.
    pub fn remove(&mut self, id: &str) -> Result<(), FilterError> {
        let idx = self
            .node_indices
            .remove(id)
            .ok_or_else(|| FilterError::UnknownNode(id.to_string()))?;
        self.graph.remove_node(idx);
        if self.source == Some(idx) {
            self.source = None;
        }
        if self.sink == Some(idx) {
            self.sink = None;
        }
        self.order.clear();
        Ok(())
    }

    /// Connect the output of `from` to the input of `to`.
    pub fn link(&mut self, from: &str, to: &str) -> Result<(), FilterError> {
        let link_error = |reason: &str| FilterError::Link {
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        };

        let from_idx = *self
            .node_indices
            .get(from)
            .ok_or_else(|| FilterError::UnknownNode(from.to_string()))?;
        let to_idx = *self
            .node_indices
            .get(to)
            .ok_or_else(|| FilterError::UnknownNode(to.to_string()))?;

        if from_idx == to_idx {
            return Err(link_error("cannot link a node to itself"));
        }
        if Some(from_idx) == self.sink {
            return Err(link_error("sink has no output"));
        }
        if Some(to_idx) == self.source {
            return Err(link_error("source has no input"));
        }
        if self.graph.neighbors_directed(from_idx, Direction::Outgoing).next().is_some() {
            return Err(link_error("output already linked"));
        }
        if self.graph.neighbors_directed(to_idx, Direction::Incoming).next().is_some() {
            return Err(link_error("input already linked"));
        }

        self.graph.add_edge(from_idx, to_idx, ());
        self.order.clear();
        Ok(())
    }

    /// Check the topology and negotiate formats from source to sink.
    pub fn configure(&mut self) -> Result<(), FilterError> {
        self.order.clear();

        let source = self
            .source
            .ok_or_else(|| FilterError::Config("graph has no source".into()))?;
        let sink = self
            .sink
            .ok_or_else(|| FilterError::Config("graph has no sink".into()))?;

        // Walk the single-link chain; visiting a node twice means a cycle
        let mut order = vec![source];
        let mut current = source;
        while current != sink {
            current = self
                .graph
                .neighbors_directed(current, Direction::Outgoing)
                .next()
                .ok_or_else(|| {
                    FilterError::Config(format!("output of {} is not connected", self.graph[current].id))
                })?;
            if order.contains(&current) {
                return Err(FilterError::Config(format!("cycle at {}", self.graph[current].id)));
            }
            order.push(current);
        }

        if order.len() != self.graph.node_count() {
            let dangling = self
                .graph
                .node_indices()
                .filter(|idx| !order.contains(idx))
                .map(|idx| self.graph[idx].id.as_str())
                .join(", ");
            return Err(FilterError::Config(format!("unconnected filters: {}", dangling)));
        }

        let mut ctx = match &self.graph[source].slot {
            Slot::Source(src) => src.output_format(),
            _ => return Err(FilterError::Config("source is not an abuffer".into())),
        };

        for &idx in &order[1..] {
            let node = &mut self.graph[idx];
            node.ctx = ctx;
            let id = &node.id;
            ctx = match &mut node.slot {
                Slot::Filter(filter) => filter
                    .configure(ctx)
                    .map_err(|reason| FilterError::Config(format!("{}: {}", id, reason)))?,
                Slot::Sink(sink) => sink
                    .configure(ctx)
                    .map_err(|reason| FilterError::Config(format!("{}: {}", id, reason)))?,
                Slot::Source(_) => return Err(FilterError::Config(format!("{} is a second source", id))),
            };
        }

        debug!(
            "Configured filter graph: {}",
            order.iter().map(|idx| self.graph[*idx].id.as_str()).join(" -> ")
        );

        self.order = order;
        Ok(())
    }

    /// Node ids in processing order (empty until configured).
    pub fn chain(&self) -> Vec<&str> {
        self.order.iter().map(|idx| self.graph[*idx].id.as_str()).collect()
    }

    /// Send a runtime command to a filter node.
    ///
    /// In a configured graph the command takes effect immediately: the node
    /// runs over an empty block to apply it, and anything it emits in
    /// response (a tempo flush, say) is passed on towards the sink.
    pub fn send_command(&mut self, id: &str, key: &str, value: &str) -> Result<(), FilterError> {
        let idx = *self
            .node_indices
            .get(id)
            .ok_or_else(|| FilterError::UnknownNode(id.to_string()))?;

        let rejected = || FilterError::Command {
            node: id.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        };

        let node = &mut self.graph[idx];
        let filter = match &mut node.slot {
            Slot::Filter(filter) => filter,
            _ => return Err(rejected()),
        };
        filter.command(key, value).map_err(|err| match err {
            CommandError::Rejected => rejected(),
            CommandError::QueueFull => FilterError::QueueFull(id.to_string()),
        })?;

        let position = match self.order.iter().position(|&i| i == idx) {
            Some(position) => position,
            None => return Ok(()),
        };

        let mut output = Vec::new();
        if let Slot::Filter(filter) = &mut node.slot {
            let empty = SampleBlock::new(Vec::new(), node.ctx.channels, None);
            filter.process_erased(&node.ctx, Some(empty), &mut output);
        }
        self.forward(position + 1, output, false);
        Ok(())
    }

    /// Feed a frame into the source and run it through the chain.
    ///
    /// `None` marks the end of input: every node is flushed and the sink
    /// reports end of stream once its queue is empty.
    pub fn push(&mut self, frame: Option<RawFrame>) -> Result<(), FilterError> {
        let source = match self.order.first() {
            Some(source) => *source,
            None => return Err(FilterError::Config("graph is not configured".into())),
        };
        let eof = frame.is_none();

        let blocks = match &mut self.graph[source].slot {
            Slot::Source(src) => src.add_frame(frame)?.into_iter().collect::<Vec<_>>(),
            _ => return Err(FilterError::Config("source is not an abuffer".into())),
        };
        self.forward(1, blocks, eof);
        Ok(())
    }

    /// Run `blocks` through the nodes from position `start` of the chain on.
    fn forward(&mut self, start: usize, mut blocks: Vec<SampleBlock>, eof: bool) {
        blocks.retain(|block| !block.is_empty());

        for &idx in self.order.iter().skip(start) {
            let node = &mut self.graph[idx];
            match &mut node.slot {
                Slot::Filter(filter) => {
                    let mut output = Vec::with_capacity(blocks.len());
                    for block in blocks.drain(..) {
                        filter.process_erased(&node.ctx, Some(block), &mut output);
                    }
                    if eof {
                        filter.process_erased(&node.ctx, None, &mut output);
                    }
                    output.retain(|block| !block.is_empty());
                    blocks = output;
                }
                Slot::Sink(sink) => {
                    for block in blocks.drain(..) {
                        sink.consume(block);
                    }
                    if eof {
                        sink.finish();
                    }
                }
                Slot::Source(_) => {}
            }
        }
    }

    /// Take the next converted frame out of the sink.
    pub fn pull(&mut self) -> Result<SinkFrame, PullError> {
        let sink = self.sink.ok_or(PullError::Again)?;
        match &mut self.graph[sink].slot {
            Slot::Sink(sink) => sink.next_frame(),
            _ => Err(PullError::Again),
        }
    }
}
