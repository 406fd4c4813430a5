use super::Flow;
use crate::ast::SortParameter;
use crate::engine::{Engine, following_sibling};
use crate::error::XsltError;
use crate::frame::{InFlight, NodeSource};
use crate::nodelist::NodeList;
use crate::program::Code;
use crate::resumable::{Budget, Resumable};
use crate::sort::{SortOverride, SortState, resolve_clauses};
use std::mem;
use std::task::Poll;
use xslvm_datasource::TreeNode;

/// Records a sort parameter computed from an attribute value template.
pub(crate) fn handle_set_sort_parameter<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    code: Code,
    clause: usize,
) -> Result<Flow, XsltError> {
    let parameter = match code {
        Code::SetSortOrder => SortParameter::Order,
        Code::SetSortDataType => SortParameter::DataType,
        Code::SetSortCaseOrder => SortParameter::CaseOrder,
        _ => SortParameter::Lang,
    };
    let frame = &mut engine.frames[depth];
    let value = mem::take(&mut frame.string);
    frame.sort_overrides.push(SortOverride {
        clause,
        parameter,
        value,
    });
    Ok(Flow::Next)
}

/// Sorts the frame's node source in place. The source becomes a list in sorted order.
pub(crate) fn handle_sort<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let mut state = match engine.frames[depth].in_flight.take() {
        Some(InFlight::Sort(state)) => state,
        Some(_) => {
            return Err(XsltError::structural(
                "sort started while another operation is in flight",
            ));
        }
        None => {
            let program = engine.program(depth);
            let frame = &mut engine.frames[depth];
            let clauses = resolve_clauses(program.sort(index)?, &frame.sort_overrides)?;
            frame.sort_overrides.clear();
            let nodes = match frame.source.take() {
                Some(NodeSource::List(nodes)) => nodes,
                Some(NodeSource::Children { next, merge_text }) => {
                    let mut nodes = NodeList::new();
                    let mut cursor = next;
                    while let Some(node) = cursor {
                        cursor = following_sibling(&node, merge_text);
                        nodes.push(node);
                    }
                    nodes
                }
                Some(_) => {
                    return Err(XsltError::structural(
                        "only materialized node lists can be sorted",
                    ));
                }
                None => NodeList::new(),
            };
            let state = Box::new(SortState::new(nodes.to_vec(), clauses));
            frame.source = Some(NodeSource::List(nodes));
            frame.consumed = 0;
            log::trace!("Sorting {} nodes", frame.known_source_size().unwrap_or(0));
            state
        }
    };

    engine.evaluating = depth;
    match state.resume(engine, budget)? {
        Poll::Ready(permutation) => {
            if let Some(NodeSource::List(nodes)) = &mut engine.frames[depth].source {
                nodes.permute(&permutation);
            }
            Ok(Flow::Next)
        }
        Poll::Pending => {
            engine.frames[depth].in_flight = Some(InFlight::Sort(state));
            Ok(Flow::Suspend)
        }
    }
}
