use super::Flow;
use crate::engine::{Engine, EvalHandle, read_snapshot, read_value};
use crate::error::XsltError;
use crate::evaluator::{EvalPoll, EvaluationHost, RequestedShape};
use crate::frame::{Frame, NodeSource};
use crate::resumable::Budget;
use std::task::Poll;
use xslvm_datasource::TreeNode;

/// Polls expression `index` of the frame's program and hands a ready result to `store`.
fn evaluate_into<N: TreeNode, T>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    shape: RequestedShape,
    poll: fn(&mut EvalHandle<N>, &mut dyn EvaluationHost<N>) -> EvalPoll<T>,
    budget: &mut Budget,
    store: impl FnOnce(&mut Frame<N>, T),
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let expr = program.expression(index)?;
    match engine.poll_evaluation(depth, expr, shape, poll, budget)? {
        Poll::Ready(result) => {
            store(&mut engine.frames[depth], result);
            Ok(Flow::Next)
        }
        Poll::Pending => Ok(Flow::Suspend),
    }
}

pub(crate) fn handle_to_string<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    evaluate_into(
        engine,
        depth,
        index,
        RequestedShape::String,
        |h, host| h.string(host),
        budget,
        |frame, text| frame.string.push_str(&text),
    )
}

pub(crate) fn handle_to_boolean<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    evaluate_into(
        engine,
        depth,
        index,
        RequestedShape::Boolean,
        |h, host| h.boolean(host),
        budget,
        |frame, condition| frame.condition = condition,
    )
}

pub(crate) fn handle_to_number<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    evaluate_into(
        engine,
        depth,
        index,
        RequestedShape::Number,
        |h, host| h.number(host),
        budget,
        |frame, number| frame.number = number,
    )
}

pub(crate) fn handle_to_value<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    evaluate_into(
        engine,
        depth,
        index,
        RequestedShape::Any,
        read_value,
        budget,
        |frame, value| frame.value = Some(value),
    )
}

pub(crate) fn handle_to_snapshot<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    evaluate_into(
        engine,
        depth,
        index,
        RequestedShape::NodeSnapshot,
        read_snapshot,
        budget,
        |frame, nodes| {
            frame.end_loop();
            frame.source = Some(NodeSource::List(nodes));
        },
    )
}

/// Starts a lazily pulled node-set. The loop instruction that follows consumes it.
pub(crate) fn handle_to_iterator<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let expr = program.expression(index)?;
    match engine.start_evaluation(depth, expr, RequestedShape::NodeIterator, budget)? {
        Poll::Ready(handle) => {
            let frame = &mut engine.frames[depth];
            frame.end_loop();
            frame.source = Some(NodeSource::Evaluation {
                handle,
                expr: expr.clone(),
            });
            Ok(Flow::Next)
        }
        Poll::Pending => Ok(Flow::Suspend),
    }
}

pub(crate) fn handle_select_children<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    frame.end_loop();
    frame.source = Some(NodeSource::Children {
        next: frame.node.first_child(),
        merge_text: false,
    });
    Ok(Flow::Next)
}
