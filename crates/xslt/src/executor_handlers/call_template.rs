use super::Flow;
use crate::engine::Engine;
use crate::error::XsltError;
use crate::frame::Frame;
use crate::variables::Scope;
use std::rc::Rc;
use xslvm_datasource::TreeNode;

/// Variable scope a called program starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CalleeScope {
    /// A fresh scope over the globals: a template body.
    Global,
    /// The caller's own scope: bodies that declare nothing.
    Shared,
    /// A scope nested in the caller's: bodies that declare locals but see the caller's.
    Child,
}

/// Runs a callee on the frame's context node. The first execution pushes the callee;
/// executing again after it returned moves on.
fn call_once<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    callee: impl FnOnce(&Engine<N>, &Frame<N>) -> Result<Frame<N>, XsltError>,
) -> Result<Flow, XsltError> {
    if engine.frames[depth].awaiting_return {
        engine.frames[depth].awaiting_return = false;
        return Ok(Flow::Next);
    }
    let frame = callee(&*engine, &engine.frames[depth])?;
    engine.push_frame(frame)?;
    engine.frames[depth].awaiting_return = true;
    Ok(Flow::Stay)
}

pub(crate) fn handle_call_on_node<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
    scope: CalleeScope,
) -> Result<Flow, XsltError> {
    call_once(engine, depth, |engine, caller| {
        let program = Rc::clone(caller.program.program(index)?);
        let scope = match scope {
            CalleeScope::Global => Scope::child(&engine.globals),
            CalleeScope::Shared => Rc::clone(&caller.scope),
            CalleeScope::Child => Scope::child(&caller.scope),
        };
        Ok(Frame::new(program, caller.node.clone(), scope)
            .on_context_of(caller)
            .with_incoming(caller.incoming.clone()))
    })
}

/// Runs the next lower-precedence template for the context node, without parameters.
pub(crate) fn handle_apply_imports<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    call_once(engine, depth, |engine, caller| {
        let program = Rc::clone(caller.program.program(index)?);
        Ok(
            Frame::new(program, caller.node.clone(), Scope::child(&engine.globals))
                .on_context_of(caller),
        )
    })
}

pub(crate) fn handle_call_template<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    index: usize,
) -> Result<Flow, XsltError> {
    call_once(engine, depth, |engine, caller| {
        let name = caller.program.expanded_name(index)?;
        let program = engine
            .stylesheet
            .named_template(name)
            .ok_or_else(|| XsltError::UnknownTemplate(name.to_string()))?;
        log::trace!("Calling named template '{}'", name);
        Ok(
            Frame::new(program, caller.node.clone(), Scope::child(&engine.globals))
                .on_context_of(caller)
                .with_incoming(caller.params.clone()),
        )
    })
}
