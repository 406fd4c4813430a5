use super::Flow;
use crate::engine::{Engine, read_value};
use crate::error::{EvaluationTarget, XsltError};
use crate::evaluator::{Evaluation, EvaluationContext, RequestedShape, describe_patterns};
use crate::frame::{InFlight, NodeSource};
use crate::resumable::{Budget, Query, Resumable, StagedEvaluation};
use crate::sort::KeyHost;
use crate::value::Value;
use std::task::Poll;
use xslvm_datasource::TreeNode;

/// Starts the document-order search for nodes a key definition indexes.
pub(crate) fn handle_search_patterns<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    start: usize,
    count: usize,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let patterns = program.patterns(start, count)?;
    let handle = engine
        .patterns
        .start_search(engine.frames[depth].node.clone(), patterns);
    let frame = &mut engine.frames[depth];
    frame.end_loop();
    frame.source = Some(NodeSource::Search {
        handle,
        description: describe_patterns(patterns),
    });
    Ok(Flow::Next)
}

/// Indexes one found node under the values of the `use` expression, then executes
/// again for the next node until the search is exhausted.
pub(crate) fn handle_process_key<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let expr = program.expression(index)?;
    let (name, root) = engine.frames[depth]
        .building_key
        .clone()
        .ok_or_else(|| XsltError::structural("key processing outside a key program"))?;

    let (node, mut evaluation) = match engine.frames[depth].in_flight.take() {
        Some(InFlight::Key { node, evaluation }) => (node, evaluation),
        Some(_) => {
            return Err(XsltError::structural(
                "key processing resumed with another operation in flight",
            ));
        }
        None => match engine.pull_node(depth, budget)? {
            Poll::Ready(Some(node)) => {
                let evaluation = expr.start(
                    EvaluationContext::new(node.clone(), 1, 1),
                    RequestedShape::Any,
                );
                let evaluation: Box<dyn Evaluation<N>> =
                    Box::new(StagedEvaluation::new(evaluation));
                (node, evaluation)
            }
            Poll::Ready(None) => {
                engine.frames[depth].end_loop();
                return Ok(Flow::Next);
            }
            Poll::Pending => return Ok(Flow::Suspend),
        },
    };

    engine.evaluating = depth;
    let mut host = KeyHost {
        inner: &mut *engine,
        current: node.clone(),
    };
    let outcome = Query::new(
        evaluation.as_mut(),
        read_value,
        EvaluationTarget::Expression,
        expr.source(),
    )
    .resume(&mut host, budget)?;

    match outcome {
        Poll::Ready(Value::NodeSet(nodes)) => {
            for keyed in nodes.to_vec() {
                engine
                    .keys
                    .insert(&name, &root, keyed.string_value(), &node);
            }
            Ok(Flow::Stay)
        }
        Poll::Ready(value) => {
            engine
                .keys
                .insert(&name, &root, value.to_string_value(), &node);
            Ok(Flow::Stay)
        }
        Poll::Pending => {
            engine.frames[depth].in_flight = Some(InFlight::Key { node, evaluation });
            Ok(Flow::Suspend)
        }
    }
}
