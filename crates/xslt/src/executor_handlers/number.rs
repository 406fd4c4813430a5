use super::Flow;
use crate::engine::Engine;
use crate::error::{EvaluationTarget, XsltError};
use crate::evaluator::describe_patterns;
use crate::frame::InFlight;
use crate::number::{format_numbers, format_value};
use crate::resumable::{Budget, Query, Resumable};
use std::mem;
use std::task::Poll;
use xslvm_datasource::TreeNode;

/// Tests the context node against a pattern batch; the condition register holds the
/// answer.
pub(crate) fn handle_match_patterns<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    start: usize,
    count: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let patterns = program.patterns(start, count)?;
    let mut handle = match engine.frames[depth].in_flight.take() {
        Some(InFlight::Match(handle)) => handle,
        Some(_) => {
            return Err(XsltError::structural(
                "pattern match resumed with another operation in flight",
            ));
        }
        None => engine
            .patterns
            .start_match(engine.frames[depth].node.clone(), patterns),
    };
    engine.evaluating = depth;
    let description = describe_patterns(patterns);
    let outcome = Query::new(
        handle.as_mut(),
        |h, host| h.matched(host),
        EvaluationTarget::Pattern,
        &description,
    )
    .resume(engine, budget)?;
    match outcome {
        Poll::Ready(matched) => {
            engine.frames[depth].condition = matched.is_some();
            Ok(Flow::Next)
        }
        Poll::Pending => {
            engine.frames[depth].in_flight = Some(InFlight::Match(handle));
            Ok(Flow::Suspend)
        }
    }
}

/// Computes the `number` counts of the context node.
pub(crate) fn handle_count<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let decl = program.number(index)?;
    let mut handle = match engine.frames[depth].in_flight.take() {
        Some(InFlight::Count(handle)) => handle,
        Some(_) => {
            return Err(XsltError::structural(
                "counting resumed with another operation in flight",
            ));
        }
        None => engine.patterns.start_count(
            engine.frames[depth].node.clone(),
            decl.level,
            &decl.count,
            &decl.from,
        ),
    };
    engine.evaluating = depth;
    let description = if decl.count.is_empty() {
        "count".to_string()
    } else {
        describe_patterns(&decl.count)
    };
    let outcome = Query::new(
        handle.as_mut(),
        |h, host| h.counts(host),
        EvaluationTarget::Pattern,
        &description,
    )
    .resume(engine, budget)?;
    match outcome {
        Poll::Ready(counts) => {
            engine.frames[depth].counts = counts;
            Ok(Flow::Next)
        }
        Poll::Pending => {
            engine.frames[depth].in_flight = Some(InFlight::Count(handle));
            Ok(Flow::Suspend)
        }
    }
}

/// Formats the number register (for `value`) or the counts with the format string
/// in the string register and outputs the result as text.
pub(crate) fn handle_format<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let decl = program.number(index)?;
    let frame = &mut engine.frames[depth];
    let format = mem::take(&mut frame.string);
    let text = if decl.value.is_some() {
        format_value(frame.number, &format, decl.grouping)
    } else {
        format_numbers(&mem::take(&mut frame.counts), &format, decl.grouping)
    };
    if !text.is_empty() {
        engine.output.current().add_text(&text, false)?;
    }
    Ok(Flow::Next)
}
