//! `anull` - pass audio through unchanged

use crate::frame::SampleBlock;
use crate::node::{FilterNode, ProcessContext};

/// Passes every block through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct Null;

impl FilterNode for Null {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        input: Option<SampleBlock>,
        output: &mut Vec<SampleBlock>,
    ) {
        if let Some(block) = input {
            output.push(block);
        }
    }
}
