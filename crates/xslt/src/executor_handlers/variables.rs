use super::Flow;
use crate::ast::VariableDecl;
use crate::engine::Engine;
use crate::error::XsltError;
use crate::value::Value;
use crate::variables::{ParamStage, VariableValue, lookup};
use std::mem;
use std::rc::Rc;
use xslvm_datasource::TreeNode;

/// Which register a binding instruction reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    /// The value left by an evaluation or a fragment collection.
    Value,
    String,
}

fn take_value<N: TreeNode>(engine: &mut Engine<N>, depth: usize, source: Source) -> Value<N> {
    let frame = &mut engine.frames[depth];
    match source {
        Source::Value => frame
            .value
            .take()
            .unwrap_or_else(|| Value::String(String::new())),
        Source::String => Value::String(mem::take(&mut frame.string)),
    }
}

fn declaration<N: TreeNode>(
    engine: &Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Rc<VariableDecl<N>>, XsltError> {
    engine.frames[depth].program.variable(index).cloned()
}

pub(crate) fn handle_start_collect_text<N: TreeNode>(
    engine: &mut Engine<N>,
) -> Result<Flow, XsltError> {
    engine.output.start_text();
    Ok(Flow::Next)
}

pub(crate) fn handle_end_collect_text<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let text = engine
        .output
        .end_text()
        .ok_or_else(|| XsltError::structural("end of text collection without a matching start"))?;
    engine.frames[depth].string.push_str(&text);
    Ok(Flow::Next)
}

pub(crate) fn handle_start_collect_fragment<N: TreeNode>(
    engine: &mut Engine<N>,
) -> Result<Flow, XsltError> {
    engine.output.start_fragment();
    Ok(Flow::Next)
}

pub(crate) fn handle_end_collect_fragment<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let tree = engine.output.end_fragment().ok_or_else(|| {
        XsltError::structural("end of fragment collection without a matching start")
    })?;
    engine.frames[depth].value = Some(Value::Fragment(Rc::new(tree)));
    Ok(Flow::Next)
}

/// Binds a variable or parameter. Top-level declarations fill their cell in the
/// global scope; locals go into the frame's scope.
pub(crate) fn handle_set_variable<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    source: Source,
) -> Result<Flow, XsltError> {
    let decl = declaration(engine, depth, index)?;
    let value = take_value(engine, depth, source);
    if decl.global {
        match lookup(&engine.globals, decl.id()) {
            Some(cell) => *cell.borrow_mut() = VariableValue::Ready(value),
            None => engine
                .globals
                .borrow_mut()
                .set(&decl, VariableValue::Ready(value)),
        }
    } else {
        engine.frames[depth]
            .scope
            .borrow_mut()
            .set(&decl, VariableValue::Ready(value));
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_set_with_param<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    source: Source,
) -> Result<Flow, XsltError> {
    let decl = declaration(engine, depth, index)?;
    let value = take_value(engine, depth, source);
    let stage = engine.frames[depth]
        .params
        .clone()
        .ok_or_else(|| XsltError::structural(format!("with-param '{}' outside a call", decl.name)))?;
    stage.borrow_mut().set(decl.name.clone(), value);
    Ok(Flow::Next)
}

pub(crate) fn handle_start_collect_params<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    frame.params = Some(ParamStage::push(frame.params.take()));
    Ok(Flow::Next)
}

pub(crate) fn handle_reset_params<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    frame.params = frame.params.take().and_then(|stage| ParamStage::pop(&stage));
    Ok(Flow::Next)
}

/// Binds a parameter to the value its caller supplied, if any. The condition register
/// tells the following jump whether the default still has to be computed.
pub(crate) fn handle_test_param<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    let decl = declaration(engine, depth, index)?;
    let supplied = if decl.global {
        match engine.stylesheet.parameter(&decl.name) {
            Some(value) => {
                match lookup(&engine.globals, decl.id()) {
                    Some(cell) => *cell.borrow_mut() = VariableValue::Ready(value),
                    None => engine
                        .globals
                        .borrow_mut()
                        .set(&decl, VariableValue::Ready(value)),
                }
                true
            }
            None => false,
        }
    } else {
        let frame = &engine.frames[depth];
        let passed = frame
            .incoming
            .as_ref()
            .and_then(|stage| stage.borrow().get(&decl.name));
        match passed {
            Some(cell) => {
                frame.scope.borrow_mut().share(&decl, cell);
                true
            }
            None => false,
        }
    };
    engine.frames[depth].condition = supplied;
    Ok(Flow::Next)
}
