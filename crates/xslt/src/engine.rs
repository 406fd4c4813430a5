//! The resumable execution engine.
//!
//! An [`Engine`] interprets compiled programs over an explicit stack of frames. The
//! host calls [`Engine::run_slice`] repeatedly; each call executes instructions until
//! the slice budget is spent, an evaluator operation is pending, the engine is blocked
//! or the transformation is complete. Everything needed to continue lives in the
//! frames, so a slice may end after any instruction.
//!
//! The engine is also the [`EvaluationHost`] for every handle it polls. Variable and
//! key requests that need work (computing a top-level variable, building a key table)
//! push a frame for that work, answer `Pending` and flag the engine as interrupted;
//! the run loop then carries on with the new frame instead of ending the slice.

use crate::ast::VariableDecl;
use crate::collect::OutputStack;
use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, Disposition, LogSink, MessageSink};
use crate::error::{EvaluationError, EvaluationTarget, XsltError};
use crate::evaluator::{
    EvalPoll, Evaluation, EvaluationContext, EvaluationHost, ExprRef, PatternEvaluator,
    RequestedShape, ResultKind,
};
use crate::executor_handlers::{self, Flow};
use crate::frame::{Frame, NodeSource};
use crate::keys::{KeyIndex, TableState};
use crate::nodelist::NodeList;
use crate::output::OutputHandler;
use crate::program::Program;
use crate::resumable::{Budget, Query, Resumable, StagedEvaluation};
use crate::stylesheet::Stylesheet;
use crate::value::Value;
use crate::variables::{Scope, ScopeRef, VariableValue, lookup};
use itertools::Itertools;
use std::rc::Rc;
use std::task::Poll;
use xslvm_datasource::{ExpandedName, QualifiedName, TreeNode};

/// How a call to [`Engine::run_slice`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceOutcome {
    /// The last frame returned and the output has been ended.
    Finished,
    /// The budget ran out or an evaluator asked to be polled again later.
    Yielded,
    /// The evaluator is waiting on an external resource.
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Running,
    Finished,
    Failed,
}

/// Evaluation handles as stored in frames.
pub(crate) type EvalHandle<N> = dyn Evaluation<N>;

type EvalFn<N, T> = fn(&mut EvalHandle<N>, &mut dyn EvaluationHost<N>) -> EvalPoll<T>;

pub struct Engine<N: TreeNode> {
    config: EngineConfig,
    pub(crate) stylesheet: Rc<dyn Stylesheet<N>>,
    pub(crate) patterns: Rc<dyn PatternEvaluator<N>>,
    pub(crate) output: OutputStack,
    pub(crate) messages: Box<dyn MessageSink>,
    pub(crate) frames: Vec<Frame<N>>,
    root: N,
    pub(crate) globals: ScopeRef<N>,
    pub(crate) keys: KeyIndex<N>,
    /// Names of the elements started with `StartElement`, innermost last.
    pub(crate) element_names: Vec<QualifiedName>,
    /// Set when a host callback pushed a frame during the current instruction.
    interrupted: bool,
    blocked: bool,
    /// The frame whose handle is being polled; host callbacks answer for it.
    pub(crate) evaluating: usize,
    /// An engine error raised inside a host callback. It replaces the evaluator's
    /// rendition of the failure.
    fault: Option<XsltError>,
    /// Context for the next evaluation error, e.g. a variable dependency chain.
    error_detail: Option<String>,
    state: EngineState,
}

impl<N: TreeNode> Engine<N> {
    /// An engine that runs `program` with `root` as context node.
    pub fn new(
        program: Rc<Program<N>>,
        root: N,
        stylesheet: Rc<dyn Stylesheet<N>>,
        patterns: Rc<dyn PatternEvaluator<N>>,
        output: impl OutputHandler + 'static,
    ) -> Self {
        let globals = Scope::root();
        for decl in stylesheet.global_variables() {
            globals
                .borrow_mut()
                .set(&decl, VariableValue::NeedsCalculation);
        }
        let first = Frame::new(program, root.clone(), Scope::child(&globals));
        Self {
            config: EngineConfig::default(),
            stylesheet,
            patterns,
            output: OutputStack::new(Box::new(output)),
            messages: Box::new(LogSink),
            frames: vec![first],
            root,
            globals,
            keys: KeyIndex::new(),
            element_names: Vec::new(),
            interrupted: false,
            blocked: false,
            evaluating: 0,
            fault: None,
            error_detail: None,
            state: EngineState::Running,
        }
    }

    /// An engine that starts by applying templates to `root` in the default mode.
    pub fn for_stylesheet(
        root: N,
        stylesheet: Rc<dyn Stylesheet<N>>,
        patterns: Rc<dyn PatternEvaluator<N>>,
        output: impl OutputHandler + 'static,
    ) -> Result<Self, XsltError> {
        let program = stylesheet.apply_templates_program(None, root.node_type())?;
        Ok(Self::new(program, root, stylesheet, patterns, output))
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_message_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.messages = Box::new(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of live frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_finished(&self) -> bool {
        self.state == EngineState::Finished
    }

    /// Runs slices until the transformation finishes or blocks.
    pub fn run(&mut self) -> Result<SliceOutcome, XsltError> {
        loop {
            match self.run_slice()? {
                SliceOutcome::Yielded => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Executes instructions until the slice budget is spent or execution must pause.
    ///
    /// After the transformation finished or failed every further call returns
    /// [`XsltError::Finished`].
    pub fn run_slice(&mut self) -> Result<SliceOutcome, XsltError> {
        if self.state != EngineState::Running {
            return Err(XsltError::Finished);
        }
        self.blocked = false;
        let mut budget = Budget::new(self.config.slice_budget);
        loop {
            let Some(depth) = self.frames.len().checked_sub(1) else {
                return self.finish();
            };
            if budget.is_exhausted() {
                log::trace!("Slice budget spent at depth {}", self.frames.len());
                return Ok(SliceOutcome::Yielded);
            }
            match self.step(depth, &mut budget) {
                Ok(Flow::Suspend) => {
                    if std::mem::take(&mut self.interrupted) {
                        continue;
                    }
                    if self.blocked {
                        log::trace!("Blocked at depth {}", self.frames.len());
                        return Ok(SliceOutcome::Blocked);
                    }
                    log::trace!("Pending evaluation at depth {}, yielding", self.frames.len());
                    return Ok(SliceOutcome::Yielded);
                }
                Ok(flow) => {
                    if let Err(err) = self.advance(depth, flow) {
                        self.recover(depth, err)?;
                    }
                }
                Err(err) => self.recover(depth, err)?,
            }
        }
    }

    fn step(&mut self, depth: usize, budget: &mut Budget) -> Result<Flow, XsltError> {
        self.interrupted = false;
        self.fault = None;
        self.error_detail = None;
        let frame = &self.frames[depth];
        let instruction = frame.program.instruction(frame.ip).ok_or_else(|| {
            XsltError::structural(format!(
                "instruction pointer {} is outside the {:?} program",
                frame.ip, frame.program.kind
            ))
        })?;
        budget.charge(1);
        executor_handlers::execute(self, depth, instruction, budget)
    }

    fn advance(&mut self, depth: usize, flow: Flow) -> Result<(), XsltError> {
        let Some(frame) = self.frames.get_mut(depth) else {
            return Ok(());
        };
        match flow {
            Flow::Next => frame.ip += 1,
            Flow::Jump(delta) => {
                frame.ip = frame
                    .ip
                    .checked_add_signed(delta as isize)
                    .ok_or_else(|| XsltError::structural(format!("jump {:+} out of program", delta)))?;
            }
            Flow::Stay | Flow::Suspend => {}
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<SliceOutcome, XsltError> {
        self.output.truncate(0);
        if let Err(err) = self.output.sink().end_output() {
            self.state = EngineState::Failed;
            return Err(err.into());
        }
        self.state = EngineState::Finished;
        log::debug!("Transformation finished");
        Ok(SliceOutcome::Finished)
    }

    /// Reports `err` and either skips the failing instruction or fails the run.
    fn recover(&mut self, depth: usize, err: XsltError) -> Result<(), XsltError> {
        let mut err = self.fault.take().unwrap_or(err);
        if let Some(detail) = self.error_detail.take() {
            err = err.with_additional(detail);
        }
        let location = self
            .frames
            .get(depth)
            .and_then(|frame| frame.program.location(frame.ip));
        let err = err.at(location);

        let fatal = match &err {
            // The message that asked to terminate has been reported already.
            XsltError::Terminated(_) => true,
            XsltError::RecursionLimit { .. } | XsltError::Output(_) => {
                self.report(&err);
                true
            }
            _ => self.report(&err) == Disposition::Fatal,
        };
        if fatal {
            self.state = EngineState::Failed;
            while self.pop_frame().is_some() {}
            self.output.truncate(0);
            return Err(err);
        }

        log::warn!("Continuing after error: {}", err);
        while self.frames.len() > depth + 1 {
            self.discard_frame();
        }
        if let Some(frame) = self.frames.get_mut(depth) {
            frame.in_flight = None;
            frame.end_loop();
            frame.string.clear();
            frame.sort_overrides.clear();
            frame.ip += 1;
        }
        Ok(())
    }

    fn report(&mut self, err: &XsltError) -> Disposition {
        self.messages
            .report(&Diagnostic::error(err.to_string(), err.location()))
    }

    pub(crate) fn push_frame(&mut self, mut frame: Frame<N>) -> Result<(), XsltError> {
        if self.frames.len() >= self.config.max_recursion_depth {
            return Err(XsltError::RecursionLimit {
                depth: self.config.max_recursion_depth,
            });
        }
        frame.collector_depth = self.output.depth();
        frame.element_depth = self.element_names.len();
        log::trace!(
            "Calling {:?} program, depth {}",
            frame.program.kind,
            self.frames.len() + 1
        );
        self.frames.push(frame);
        Ok(())
    }

    /// Destroys the top frame together with whatever it still had in flight.
    pub(crate) fn pop_frame(&mut self) -> Option<Frame<N>> {
        self.remove_frame(true)
    }

    /// Destroys a frame that error recovery cuts off before it returned. A variable
    /// it was computing needs calculation again, and a key table it was filling is
    /// dropped.
    fn discard_frame(&mut self) -> Option<Frame<N>> {
        self.remove_frame(false)
    }

    fn remove_frame(&mut self, returned: bool) -> Option<Frame<N>> {
        let frame = self.frames.pop()?;
        if let Some(decl) = &frame.computing {
            if let Some(cell) = lookup(&self.globals, decl.id()) {
                let mut value = cell.borrow_mut();
                if matches!(*value, VariableValue::BeingCalculated) {
                    *value = if returned {
                        VariableValue::Ready(Value::String(String::new()))
                    } else {
                        VariableValue::NeedsCalculation
                    };
                }
            }
        }
        if let Some((name, root)) = &frame.building_key {
            if returned {
                self.keys.finish(name, root);
                log::debug!("Key '{}' indexed", name);
            } else {
                self.keys.abandon(name, root);
            }
        }
        self.output.truncate(frame.collector_depth);
        self.element_names.truncate(frame.element_depth);
        log::trace!(
            "Returned from {:?} program, depth {}",
            frame.program.kind,
            self.frames.len()
        );
        Some(frame)
    }

    pub(crate) fn program(&self, depth: usize) -> Rc<Program<N>> {
        Rc::clone(&self.frames[depth].program)
    }

    /// Starts `expr` on the context of frame `depth`. Pending only while the context
    /// size is still being worked out.
    pub(crate) fn start_evaluation(
        &mut self,
        depth: usize,
        expr: &ExprRef<N>,
        shape: RequestedShape,
        budget: &mut Budget,
    ) -> Result<Poll<Box<EvalHandle<N>>>, XsltError> {
        let size = if expr.needs_context_size() {
            match self.context_size(depth, budget)? {
                Poll::Ready(size) => size,
                Poll::Pending => return Ok(Poll::Pending),
            }
        } else {
            self.frames[depth].size.unwrap_or(0)
        };
        let frame = &self.frames[depth];
        let context = EvaluationContext::new(frame.node.clone(), frame.position, size);
        let handle: Box<EvalHandle<N>> =
            Box::new(StagedEvaluation::new(expr.start(context, shape)));
        Ok(Poll::Ready(handle))
    }

    /// Polls the evaluation of `expr` that frame `depth` has in flight, starting it
    /// first if there is none. The handle stays with the frame while it is pending.
    pub(crate) fn poll_evaluation<T>(
        &mut self,
        depth: usize,
        expr: &ExprRef<N>,
        shape: RequestedShape,
        poll: EvalFn<N, T>,
        budget: &mut Budget,
    ) -> Result<Poll<T>, XsltError> {
        let mut handle = match self.frames[depth].in_flight.take() {
            Some(crate::frame::InFlight::Evaluation(handle)) => handle,
            Some(_) => {
                return Err(XsltError::structural(format!(
                    "cannot evaluate '{}' while another operation is in flight",
                    expr.source()
                )));
            }
            None => match self.start_evaluation(depth, expr, shape, budget)? {
                Poll::Ready(handle) => handle,
                Poll::Pending => return Ok(Poll::Pending),
            },
        };
        self.evaluating = depth;
        let outcome = Query::new(
            handle.as_mut(),
            poll,
            EvaluationTarget::Expression,
            expr.source(),
        )
        .resume(self, budget)?;
        if outcome.is_pending() {
            self.frames[depth].in_flight = Some(crate::frame::InFlight::Evaluation(handle));
        }
        Ok(outcome)
    }

    /// Next node of frame `depth`'s loop source, charging one unit per node on top of
    /// whatever the evaluator spent producing it. `None` once the source is exhausted.
    pub(crate) fn pull_node(
        &mut self,
        depth: usize,
        budget: &mut Budget,
    ) -> Result<Poll<Option<N>>, XsltError> {
        let frame = &mut self.frames[depth];
        match frame.source.take() {
            None => Ok(Poll::Ready(None)),
            Some(NodeSource::List(mut nodes)) => {
                while frame.consumed < nodes.count() {
                    let index = frame.consumed;
                    frame.consumed += 1;
                    if let Some(node) = nodes.steal(index) {
                        frame.source = Some(NodeSource::List(nodes));
                        budget.charge(1);
                        return Ok(Poll::Ready(Some(node)));
                    }
                }
                Ok(Poll::Ready(None))
            }
            Some(NodeSource::Children { next, merge_text }) => {
                let Some(node) = next else {
                    return Ok(Poll::Ready(None));
                };
                frame.consumed += 1;
                frame.source = Some(NodeSource::Children {
                    next: following_sibling(&node, merge_text),
                    merge_text,
                });
                budget.charge(1);
                Ok(Poll::Ready(Some(node)))
            }
            Some(NodeSource::Evaluation { mut handle, expr }) => {
                // Nodes drained to learn the context size come first.
                if let Some(node) = frame
                    .drained
                    .as_mut()
                    .and_then(|drained| drained.steal(frame.consumed))
                {
                    frame.consumed += 1;
                    frame.source = Some(NodeSource::Evaluation { handle, expr });
                    budget.charge(1);
                    return Ok(Poll::Ready(Some(node)));
                }
                self.evaluating = depth;
                let next = Query::new(
                    handle.as_mut(),
                    |h, host| h.next_node(host),
                    EvaluationTarget::Expression,
                    expr.source(),
                )
                .resume(self, budget)?;
                let frame = &mut self.frames[depth];
                match next {
                    Poll::Ready(None) => Ok(Poll::Ready(None)),
                    Poll::Ready(Some(node)) => {
                        frame.consumed += 1;
                        frame.source = Some(NodeSource::Evaluation { handle, expr });
                        budget.charge(1);
                        Ok(Poll::Ready(Some(node)))
                    }
                    Poll::Pending => {
                        frame.source = Some(NodeSource::Evaluation { handle, expr });
                        Ok(Poll::Pending)
                    }
                }
            }
            Some(NodeSource::Search {
                mut handle,
                description,
            }) => {
                self.evaluating = depth;
                let next = Query::new(
                    handle.as_mut(),
                    |h, host| h.next_node(host),
                    EvaluationTarget::Pattern,
                    &description,
                )
                .resume(self, budget)?;
                let frame = &mut self.frames[depth];
                if let Poll::Ready(Some(_)) = next {
                    frame.consumed += 1;
                    budget.charge(1);
                }
                if !matches!(next, Poll::Ready(None)) {
                    frame.source = Some(NodeSource::Search {
                        handle,
                        description,
                    });
                }
                Ok(next)
            }
        }
    }

    /// The context size of frame `depth`, computed on first request.
    ///
    /// Frames that run on their caller's context share its size. The first frame of
    /// that chain was pushed by a loop one level down, and the size is that loop's:
    /// the length of its node list, the number of siblings a child loop visits, or,
    /// for a lazily evaluated node-set, the count after draining the rest of it.
    pub(crate) fn context_size(
        &mut self,
        depth: usize,
        budget: &mut Budget,
    ) -> Result<Poll<usize>, XsltError> {
        if let Some(size) = self.frames[depth].size {
            return Ok(Poll::Ready(size));
        }
        let mut index = depth;
        while index > 0 && self.frames[index].size.is_none() && self.frames[index].inherits_context
        {
            index -= 1;
        }
        let size = match (self.frames[index].size, index.checked_sub(1)) {
            (Some(size), _) => size,
            (None, None) => 1,
            (None, Some(loop_index)) => match self.loop_size(loop_index, budget)? {
                Poll::Ready(size) => size,
                Poll::Pending => return Ok(Poll::Pending),
            },
        };
        for frame in &mut self.frames[index..=depth] {
            frame.size = Some(size);
        }
        Ok(Poll::Ready(size))
    }

    fn loop_size(&mut self, index: usize, budget: &mut Budget) -> Result<Poll<usize>, XsltError> {
        let frame = &mut self.frames[index];
        match frame.source.take() {
            None => Ok(Poll::Ready(frame.consumed.max(1))),
            Some(NodeSource::List(nodes)) => {
                let size = nodes.count();
                frame.source = Some(NodeSource::List(nodes));
                Ok(Poll::Ready(size))
            }
            Some(NodeSource::Children { next, merge_text }) => {
                let mut remaining = 0;
                let mut cursor = next.clone();
                while let Some(node) = cursor {
                    remaining += 1;
                    cursor = following_sibling(&node, merge_text);
                }
                budget.charge(remaining as i64);
                let size = frame.consumed + remaining;
                frame.source = Some(NodeSource::Children { next, merge_text });
                Ok(Poll::Ready(size))
            }
            Some(search @ NodeSource::Search { .. }) => {
                frame.source = Some(search);
                Ok(Poll::Ready(frame.consumed))
            }
            Some(NodeSource::Evaluation { mut handle, expr }) => {
                let mut drained = frame.drained.take().unwrap_or_else(|| {
                    let mut list = NodeList::new();
                    list.set_offset(frame.consumed);
                    list
                });
                loop {
                    self.evaluating = index;
                    let next = Query::new(
                        handle.as_mut(),
                        |h, host| h.next_node(host),
                        EvaluationTarget::Expression,
                        expr.source(),
                    )
                    .resume(self, budget)?;
                    match next {
                        Poll::Ready(Some(node)) => drained.push(node),
                        Poll::Ready(None) => {
                            let size = drained.count();
                            self.frames[index].source = Some(NodeSource::List(drained));
                            return Ok(Poll::Ready(size));
                        }
                        Poll::Pending => break,
                    }
                    if budget.is_exhausted() {
                        break;
                    }
                }
                let frame = &mut self.frames[index];
                frame.source = Some(NodeSource::Evaluation { handle, expr });
                frame.drained = Some(drained);
                Ok(Poll::Pending)
            }
        }
    }

    fn dependency_chain(&self, requested: &VariableDecl<N>) -> String {
        let chain = self
            .frames
            .iter()
            .filter_map(|frame| frame.computing.as_ref())
            .map(|decl| decl.name.to_string())
            .chain(std::iter::once(requested.name.to_string()))
            .join(" <= ");
        format!("circular dependency between variables: {}", chain)
    }

    /// Schedules the program computing a top-level variable.
    fn calculate(&mut self, decl: &Rc<VariableDecl<N>>) -> Result<(), XsltError> {
        let program = decl.program()?;
        let mut frame = Frame::new(program, self.root.clone(), Scope::child(&self.globals));
        frame.computing = Some(Rc::clone(decl));
        self.push_frame(frame)?;
        log::debug!("Calculating top-level variable '{}'", decl.name);
        Ok(())
    }

    /// Schedules the program filling key `name` for the tree rooted at `root`.
    fn build_key(&mut self, name: &ExpandedName, root: &N) -> Result<(), XsltError> {
        let decl = self
            .stylesheet
            .key(name)
            .ok_or_else(|| XsltError::structural(format!("unknown key '{}'", name)))?;
        let mut frame = Frame::new(decl.program()?, root.clone(), Scope::child(&self.globals));
        frame.building_key = Some((name.clone(), root.clone()));
        self.push_frame(frame)?;
        self.keys.begin(name, root);
        log::debug!("Building index for key '{}'", name);
        Ok(())
    }

    /// Keeps `err` as the real failure and hands the evaluator its message.
    fn stash(&mut self, err: XsltError) -> EvaluationError {
        let message = err.to_string();
        self.fault = Some(err);
        EvaluationError::new(message)
    }
}

impl<N: TreeNode> EvaluationHost<N> for Engine<N> {
    fn current_node(&self) -> Option<N> {
        self.frames.get(self.evaluating).map(|frame| frame.node.clone())
    }

    fn variable(&mut self, decl: &Rc<VariableDecl<N>>) -> EvalPoll<Value<N>> {
        let scope = self
            .frames
            .get(self.evaluating)
            .map_or_else(|| Rc::clone(&self.globals), |frame| Rc::clone(&frame.scope));
        let Some(cell) = lookup(&scope, decl.id()) else {
            return Err(EvaluationError::new(format!(
                "variable '{}' is not in scope",
                decl.name
            )));
        };
        let needs_calculation = match &*cell.borrow() {
            VariableValue::Ready(value) => return Ok(Poll::Ready(value.clone())),
            VariableValue::NeedsCalculation => true,
            VariableValue::BeingCalculated => false,
        };
        if !needs_calculation {
            self.error_detail = Some(self.dependency_chain(decl));
            return Err(EvaluationError::new(format!(
                "variable '{}' depends on its own value",
                decl.name
            )));
        }
        *cell.borrow_mut() = VariableValue::BeingCalculated;
        if let Err(err) = self.calculate(decl) {
            *cell.borrow_mut() = VariableValue::NeedsCalculation;
            return Err(self.stash(err));
        }
        self.interrupted = true;
        Ok(Poll::Pending)
    }

    fn keyed_nodes(&mut self, name: &ExpandedName, node: &N, value: &str) -> EvalPoll<Vec<N>> {
        let root = node.root();
        match self.keys.state(name, &root) {
            TableState::Ready => Ok(Poll::Ready(self.keys.find(name, &root, value))),
            TableState::Building => Err(EvaluationError::new(format!(
                "key '{}' is used while its own index is being built",
                name
            ))),
            TableState::Missing => {
                if let Err(err) = self.build_key(name, &root) {
                    return Err(self.stash(err));
                }
                self.interrupted = true;
                Ok(Poll::Pending)
            }
        }
    }

    fn set_blocked(&mut self) {
        self.blocked = true;
    }
}

/// The next node a child loop visits after `node`. With `merge_text` the rest of a
/// run of adjacent text nodes is skipped.
pub(crate) fn following_sibling<N: TreeNode>(node: &N, merge_text: bool) -> Option<N> {
    let mut next = node.next_sibling();
    if merge_text && node.is_text() {
        while let Some(sibling) = next.as_ref().filter(|sibling| sibling.is_text()) {
            next = sibling.next_sibling();
        }
    }
    next
}

/// Reads a handle's result in its natural type.
pub(crate) fn read_value<N: TreeNode>(
    handle: &mut EvalHandle<N>,
    host: &mut dyn EvaluationHost<N>,
) -> EvalPoll<Value<N>> {
    let kind = match handle.result_kind(host)? {
        Poll::Ready(kind) => kind,
        Poll::Pending => return Ok(Poll::Pending),
    };
    Ok(match kind {
        ResultKind::Number => handle.number(host)?.map(Value::Number),
        ResultKind::Boolean => handle.boolean(host)?.map(Value::Boolean),
        ResultKind::String => handle.string(host)?.map(Value::String),
        ResultKind::Fragment => Poll::Ready(
            handle
                .fragment()
                .map_or_else(|| Value::String(String::new()), Value::Fragment),
        ),
        ResultKind::NodeSet => read_snapshot(handle, host)?.map(|nodes| Value::NodeSet(Rc::new(nodes))),
    })
}

/// Reads a node-set result into a list.
pub(crate) fn read_snapshot<N: TreeNode>(
    handle: &mut EvalHandle<N>,
    host: &mut dyn EvaluationHost<N>,
) -> EvalPoll<NodeList<N>> {
    let count = match handle.node_count(host)? {
        Poll::Ready(count) => count,
        Poll::Pending => return Ok(Poll::Pending),
    };
    let nodes = (0..count)
        .map(|index| handle.node(index))
        .collect::<Result<NodeList<N>, EvaluationError>>()?;
    Ok(Poll::Ready(nodes))
}
