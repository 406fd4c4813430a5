use super::Flow;
use crate::diagnostics::Diagnostic;
use crate::engine::Engine;
use crate::error::XsltError;
use std::mem;
use xslvm_datasource::TreeNode;

pub(crate) fn handle_jump_if<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    when: bool,
    delta: i32,
) -> Result<Flow, XsltError> {
    if engine.frames[depth].condition == when {
        Ok(Flow::Jump(delta))
    } else {
        Ok(Flow::Next)
    }
}

/// Reports the collected message text. A terminating message ends the run.
pub(crate) fn handle_message<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    terminate: bool,
) -> Result<Flow, XsltError> {
    let frame = &mut engine.frames[depth];
    let text = mem::take(&mut frame.string);
    let location = frame.program.location(frame.ip);
    engine
        .messages
        .report(&Diagnostic::message(text.clone(), location, terminate));
    if terminate {
        log::info!("Transformation terminated by message");
        return Err(XsltError::Terminated(text));
    }
    Ok(Flow::Next)
}

pub(crate) fn handle_error<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    let program = engine.program(depth);
    let detail = mem::take(&mut engine.frames[depth].string);
    let message = program.string(index)?;
    Err(XsltError::structural(if detail.is_empty() {
        message.to_string()
    } else {
        format!("{}: '{}'", message, detail)
    }))
}
