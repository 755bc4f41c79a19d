//! Core filter node trait and context types.

use crate::frame::SampleBlock;

/// Format of the interleaved f32 audio flowing into a node.
///
/// Passed to every [`FilterNode::process`] call. Filters that change the
/// channel count or the sample rate report the new format from
/// [`FilterNode::configure`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessContext {
    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: usize,
}

/// The core trait for filter nodes.
///
/// Nodes sit between the `abuffer` source and the `abuffersink` sink. They
/// receive blocks of interleaved samples and may emit any number of blocks
/// in return: a tempo filter emits fewer samples than it receives when
/// speeding up, a delay may emit nothing until its line is filled.
///
/// # Message-Based Parameters
///
/// Instead of shared mutable state, nodes receive runtime parameter updates
/// as messages. A textual command (`key`, `value`) is turned into a typed
/// message by [`parse_command`](Self::parse_command); pending messages are
/// handed over at the start of the next `process` call:
///
/// ```
/// use pcmflow::{FilterNode, ProcessContext, SampleBlock};
///
/// enum GateMessage {
///     SetThreshold(f32),
/// }
///
/// struct Gate {
///     threshold: f32,
/// }
///
/// impl FilterNode for Gate {
///     type Message = GateMessage;
///
///     fn parse_command(&self, key: &str, value: &str) -> Option<GateMessage> {
///         match key {
///             "threshold" => value.parse().ok().map(GateMessage::SetThreshold),
///             _ => None,
///         }
///     }
///
///     fn process(
///         &mut self,
///         _ctx: &ProcessContext,
///         messages: impl Iterator<Item = GateMessage>,
///         input: Option<SampleBlock>,
///         output: &mut Vec<SampleBlock>,
///     ) {
///         for msg in messages {
///             match msg {
///                 GateMessage::SetThreshold(t) => self.threshold = t,
///             }
///         }
///
///         if let Some(mut block) = input {
///             for s in block.samples.iter_mut() {
///                 if s.abs() < self.threshold {
///                     *s = 0.0;
///                 }
///             }
///             output.push(block);
///         }
///     }
/// }
/// ```
pub trait FilterNode: Send + 'static {
    /// Message type for parameter updates.
    ///
    /// Use a custom enum for nodes with parameters, or `()` for nodes without.
    type Message: Send + 'static;

    /// Negotiate formats: given the input format, return the output format.
    ///
    /// Called once when the graph is configured. The default passes the
    /// input format through unchanged.
    fn configure(&mut self, input: ProcessContext) -> Result<ProcessContext, String> {
        Ok(input)
    }

    /// Turn a textual runtime command into a message, or `None` if the
    /// node does not understand it.
    fn parse_command(&self, _key: &str, _value: &str) -> Option<Self::Message> {
        None
    }

    /// Process one block.
    ///
    /// `input` is `None` once the stream has ended: emit whatever is still
    /// buffered internally. An empty block carries no audio; the graph sends
    /// one right after a command so that `messages` are applied at once.
    fn process(
        &mut self,
        ctx: &ProcessContext,
        messages: impl Iterator<Item = Self::Message>,
        input: Option<SampleBlock>,
        output: &mut Vec<SampleBlock>,
    );
}
