use super::Flow;
use crate::engine::Engine;
use crate::error::XsltError;
use crate::frame::{Frame, NodeSource};
use crate::resumable::Budget;
use crate::variables::Scope;
use std::rc::Rc;
use std::task::Poll;
use xslvm_datasource::{NodeType, TreeNode};

/// One step of a loop over the frame's node source: pull a node and push the callee
/// for it, or move on once the source is exhausted. The loop instruction executes
/// again each time a callee returns.
fn run_loop<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    budget: &mut Budget,
    callee: impl FnOnce(&Engine<N>, &Frame<N>, N) -> Result<Frame<N>, XsltError>,
) -> Result<Flow, XsltError> {
    engine.frames[depth].awaiting_return = false;
    let node = match engine.pull_node(depth, budget)? {
        Poll::Ready(Some(node)) => node,
        Poll::Ready(None) => {
            engine.frames[depth].end_loop();
            return Ok(Flow::Next);
        }
        Poll::Pending => return Ok(Flow::Suspend),
    };
    let caller = &engine.frames[depth];
    let frame = callee(&*engine, caller, node)?
        .in_loop(caller.consumed, caller.known_source_size());
    engine.push_frame(frame)?;
    engine.frames[depth].awaiting_return = true;
    Ok(Flow::Stay)
}

/// The `for-each` loop. Bodies that declare variables get a scope of their own.
pub(crate) fn handle_call_on_nodes<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    scoped: bool,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    run_loop(engine, depth, budget, |_, caller, node| {
        let program = Rc::clone(caller.program.program(index)?);
        let scope = if scoped {
            Scope::child(&caller.scope)
        } else {
            Rc::clone(&caller.scope)
        };
        Ok(Frame::new(program, node, scope))
    })
}

pub(crate) fn handle_apply_templates<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    mode: Option<usize>,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    run_loop(engine, depth, budget, |engine, caller, node| {
        let mode = mode.map(|index| caller.program.expanded_name(index)).transpose()?;
        let program = engine
            .stylesheet
            .apply_templates_program(mode, node.node_type())?;
        Ok(Frame::new(program, node, Scope::child(&engine.globals))
            .with_incoming(caller.params.clone()))
    })
}

/// The built-in rules: text and attribute values are copied, the root and elements
/// apply templates to their children in the same mode, anything else does nothing.
/// The children loop visits a run of adjacent text nodes once, through its first
/// node, which then outputs the text of the whole run.
pub(crate) fn handle_built_in<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    if !frame.awaiting_return && frame.source.is_none() {
        match frame.node.node_type() {
            NodeType::Text => {
                let text = if frame.text_run {
                    text_run(&frame.node)
                } else {
                    frame.node.string_value()
                };
                if !text.is_empty() {
                    engine.output.current().add_text(&text, false)?;
                }
                return Ok(Flow::Next);
            }
            NodeType::Attribute => {
                let value = frame.node.string_value();
                if !value.is_empty() {
                    engine.output.current().add_text(&value, false)?;
                }
                return Ok(Flow::Next);
            }
            NodeType::Root | NodeType::Element => {
                frame.end_loop();
                frame.source = Some(NodeSource::Children {
                    next: frame.node.first_child(),
                    merge_text: true,
                });
            }
            NodeType::Comment | NodeType::ProcessingInstruction => return Ok(Flow::Next),
        }
    }
    let mode = frame.program.mode.clone();
    run_loop(engine, depth, budget, |engine, _, node| {
        let program = engine
            .stylesheet
            .apply_templates_program(mode.as_ref(), node.node_type())?;
        Ok(Frame::new(program, node, Scope::child(&engine.globals)).for_text_run())
    })
}

/// The text of `node` and of the text nodes directly following it.
fn text_run<N: TreeNode>(node: &N) -> String {
    let mut text = node.string_value();
    let mut next = node.next_sibling();
    while let Some(sibling) = next.filter(N::is_text) {
        text.push_str(&sibling.string_value());
        next = sibling.next_sibling();
    }
    text
}
