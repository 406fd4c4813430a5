use super::Flow;
use crate::engine::{Engine, read_value};
use crate::error::XsltError;
use crate::evaluator::RequestedShape;
use crate::output::{OutputHandler, OutputResult};
use crate::resumable::Budget;
use crate::value::Value;
use std::task::Poll;
use xslvm_datasource::{NodeType, QualifiedName, TreeNode};

/// Shallow copy of the context node. Elements continue two instructions on (the body
/// and the closing tag), the root one on (the body only), anything else at `delta`.
pub(crate) fn handle_copy<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    delta: i32,
) -> Result<Flow, XsltError> {
    let node = engine.frames[depth].node.clone();
    match node.node_type() {
        NodeType::Element => {
            let name = node.name().unwrap_or_default();
            let output = engine.output.current();
            output.start_element(&name)?;
            copy_namespaces(output, &node)?;
            engine.element_names.push(name);
            Ok(Flow::Jump(2))
        }
        NodeType::Root => Ok(Flow::Jump(1)),
        _ => {
            copy_leaf(engine.output.current(), &node)?;
            Ok(Flow::Jump(delta))
        }
    }
}

pub(crate) fn handle_copy_of<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let expr = program.expression(index)?;
    let value = match engine.poll_evaluation(depth, expr, RequestedShape::Any, read_value, budget)? {
        Poll::Ready(value) => value,
        Poll::Pending => return Ok(Flow::Suspend),
    };
    let output = engine.output.current();
    match value {
        Value::NodeSet(nodes) => {
            for node in nodes.to_vec() {
                copy_deep(output, &node)?;
            }
        }
        Value::Fragment(tree) => tree.replay(output)?,
        other => {
            let text = other.to_string_value();
            if !text.is_empty() {
                output.add_text(&text, false)?;
            }
        }
    }
    Ok(Flow::Next)
}

/// Outputs a node without element structure: attributes, text, comments and
/// processing instructions.
fn copy_leaf<N: TreeNode>(output: &mut dyn OutputHandler, node: &N) -> OutputResult {
    match node.node_type() {
        NodeType::Attribute => {
            output.add_attribute(&node.name().unwrap_or_default(), &node.string_value())
        }
        NodeType::Text => output.add_text(&node.string_value(), false),
        NodeType::Comment => output.add_comment(&node.string_value()),
        NodeType::ProcessingInstruction => {
            let target = node.name().map(|name| name.local).unwrap_or_default();
            output.add_processing_instruction(&target, &node.string_value())
        }
        NodeType::Root | NodeType::Element => Ok(()),
    }
}

/// Copies the namespace nodes of an element: every binding in scope on it.
fn copy_namespaces<N: TreeNode>(output: &mut dyn OutputHandler, element: &N) -> OutputResult {
    for (prefix, uri) in element.namespaces_in_scope() {
        output.suggest_namespace(prefix.as_deref(), &uri)?;
    }
    Ok(())
}

enum Step<N> {
    Enter(N),
    Leave(QualifiedName),
}

/// Copies `node` and its whole subtree, iteratively so deep trees cannot overflow.
fn copy_deep<N: TreeNode>(output: &mut dyn OutputHandler, node: &N) -> OutputResult {
    let mut stack = vec![Step::Enter(node.clone())];
    while let Some(step) = stack.pop() {
        let node = match step {
            Step::Leave(name) => {
                output.end_element(&name)?;
                continue;
            }
            Step::Enter(node) => node,
        };
        match node.node_type() {
            NodeType::Root => {}
            NodeType::Element => {
                let name = node.name().unwrap_or_default();
                output.start_element(&name)?;
                copy_namespaces(output, &node)?;
                for attribute in node.attributes() {
                    copy_leaf(output, &attribute)?;
                }
                stack.push(Step::Leave(name));
            }
            _ => {
                copy_leaf(output, &node)?;
                continue;
            }
        }
        let children: Vec<N> = node.children().collect();
        stack.extend(children.into_iter().rev().map(Step::Enter));
    }
    Ok(())
}
