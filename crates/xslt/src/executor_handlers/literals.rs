use super::Flow;
use crate::engine::Engine;
use crate::error::XsltError;
use std::mem;
use xslvm_datasource::{QualifiedName, TreeNode};

pub(crate) fn handle_append_string<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    engine.frames[depth].string.push_str(program.string(index)?);
    Ok(Flow::Next)
}

pub(crate) fn handle_set_name<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    name: Option<usize>,
) -> Result<Flow, XsltError> {
    if let Some(index) = name {
        let program = engine.program(depth);
        engine.frames[depth].name = program.name(index)?.clone();
    }
    Ok(Flow::Next)
}

/// Parses the string register as a lexical QName. An invalid name jumps to the error
/// tail with the string left in place for the message.
pub(crate) fn handle_set_qname<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    on_error: i32,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    match QualifiedName::parse(frame.string.trim()) {
        Ok(name) => {
            frame.name = name;
            frame.string.clear();
            Ok(Flow::Next)
        }
        Err(_) => Ok(Flow::Jump(on_error)),
    }
}

pub(crate) fn handle_set_uri<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    let uri = mem::take(&mut frame.string);
    frame.name.uri = (!uri.is_empty()).then_some(uri);
    Ok(Flow::Next)
}

pub(crate) fn handle_resolve_name<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    namespaces: usize,
    use_default: bool,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let scope = program.namespaces(namespaces)?;
    scope
        .resolve(&mut engine.frames[depth].name, use_default)
        .map_err(|err| XsltError::structural(err.to_string()))?;
    Ok(Flow::Next)
}

pub(crate) fn handle_start_element<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    name: Option<usize>,
) -> Result<Flow, XsltError> {
    let name = match name {
        Some(index) => engine.program(depth).name(index)?.clone(),
        None => engine.frames[depth].name.clone(),
    };
    engine.output.current().start_element(&name)?;
    engine.element_names.push(name);
    Ok(Flow::Next)
}

pub(crate) fn handle_suggest_namespace<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let output = engine.output.current();
    for (prefix, uri) in program.namespaces(index)?.declarations() {
        output.suggest_namespace(prefix, uri)?;
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_end_element<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    name: Option<usize>,
) -> Result<Flow, XsltError> {
    let started = engine
        .element_names
        .pop()
        .ok_or_else(|| XsltError::structural("end of element without a matching start"))?;
    let name = match name {
        Some(index) => engine.program(depth).name(index)?.clone(),
        None => started,
    };
    engine.output.current().end_element(&name)?;
    Ok(Flow::Next)
}

pub(crate) fn handle_add_attribute<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    let value = mem::take(&mut frame.string);
    engine.output.current().add_attribute(&frame.name, &value)?;
    Ok(Flow::Next)
}

pub(crate) fn handle_add_text<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    disable_output_escaping: bool,
) -> Result<Flow, XsltError> {
    let text = mem::take(&mut engine.frames[depth].string);
    if !text.is_empty() {
        engine
            .output
            .current()
            .add_text(&text, disable_output_escaping)?;
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_add_comment<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let text = mem::take(&mut engine.frames[depth].string);
    engine.output.current().add_comment(&text)?;
    Ok(Flow::Next)
}

pub(crate) fn handle_add_processing_instruction<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    let data = mem::take(&mut frame.string);
    let target = frame.name.to_string();
    engine
        .output
        .current()
        .add_processing_instruction(&target, &data)?;
    Ok(Flow::Next)
}
