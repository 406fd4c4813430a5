//! The boundary to the expression and pattern evaluator.
//!
//! The engine never evaluates path expressions or patterns itself. It starts a handle
//! for an [`Expression`] (or asks a [`PatternEvaluator`] for a match, search or count
//! handle), gives it the remaining cost budget, and polls it. Every poll answers with
//! one of three outcomes:
//!
//! | Result                   | Meaning                                                    |
//! |--------------------------|------------------------------------------------------------|
//! | `Ok(Poll::Ready(value))` | Done. The handle may be queried again for the same answer. |
//! | `Ok(Poll::Pending)`      | Out of budget, or waiting on the host. Poll again later.   |
//! | `Err(EvaluationError)`   | Hard failure.                                              |
//!
//! After each poll the handle reports the cost it consumed through
//! [`CostLimited::last_operation_cost`], and the engine charges it to the current slice.
//!
//! While running, a handle calls back into the engine through [`EvaluationHost`] for
//! variable values, keyed lookups and `current()`. Those callbacks follow the same
//! tri-state contract: a host answer of `Pending` means the engine has scheduled work
//! (a variable's value or a key table) and the handle must report `Pending` too.

use crate::ast::VariableDecl;
use crate::error::EvaluationError;
use crate::result_tree::ResultTree;
use crate::value::Value;
use itertools::Itertools;
use std::any::Any;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;
use xslvm_datasource::{ExpandedName, TreeNode};

pub type EvalPoll<T> = Result<Poll<T>, EvaluationError>;

pub type ExprRef<N> = Rc<dyn Expression<N>>;
pub type PatternRef<N> = Rc<dyn Pattern<N>>;

/// Context a handle is bound to when it is started.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext<N> {
    pub node: N,
    pub position: usize,
    /// `0` when the size of the enclosing node list is not known.
    pub size: usize,
}

impl<N> EvaluationContext<N> {
    pub fn new(node: N, position: usize, size: usize) -> Self {
        Self {
            node,
            position,
            size,
        }
    }
}

/// What the engine intends to read from a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedShape {
    Number,
    Boolean,
    String,
    /// Node-set pulled one node at a time with `next_node`.
    NodeIterator,
    /// Node-set read with `node_count` and `node(i)`.
    NodeSnapshot,
    /// Whatever the expression produces; node-sets as snapshots.
    Any,
}

/// The natural type of an expression's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Number,
    Boolean,
    String,
    NodeSet,
    Fragment,
}

/// Cost accounting shared by every resumable handle.
pub trait CostLimited {
    fn set_cost_limit(&mut self, limit: i64);
    fn last_operation_cost(&self) -> i64;
}

/// Services the engine offers to running handles.
pub trait EvaluationHost<N: TreeNode> {
    /// The node `current()` refers to.
    fn current_node(&self) -> Option<N>;

    /// Value of a variable or parameter. `Pending` means the value is being computed
    /// on demand; the handle must suspend and ask again when resumed.
    fn variable(&mut self, decl: &Rc<VariableDecl<N>>) -> EvalPoll<Value<N>>;

    /// Nodes of the tree containing `node` whose key `name` has the value `value`.
    fn keyed_nodes(&mut self, name: &ExpandedName, node: &N, value: &str) -> EvalPoll<Vec<N>>;

    /// Marks the engine as blocked on an external resource. The current slice
    /// then ends with [`SliceOutcome::Blocked`](crate::engine::SliceOutcome::Blocked).
    fn set_blocked(&mut self);
}

/// A compiled expression, produced by the external expression compiler.
pub trait Expression<N: TreeNode>: fmt::Debug {
    /// Source text, used in diagnostics.
    fn source(&self) -> &str;

    /// Whether evaluating this expression requires the context size (`last()`).
    fn needs_context_size(&self) -> bool {
        false
    }

    fn start(&self, context: EvaluationContext<N>, shape: RequestedShape)
    -> Box<dyn Evaluation<N>>;
}

/// An in-flight expression evaluation.
pub trait Evaluation<N: TreeNode>: CostLimited {
    fn result_kind(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<ResultKind>;

    fn number(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<f64>;

    fn boolean(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<bool>;

    fn string(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<String>;

    /// Next node of an iterator-shaped result, `None` once exhausted.
    fn next_node(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<N>>;

    fn node_count(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<usize>;

    /// Node `index` of a snapshot-shaped result. Only valid after `node_count` is ready.
    fn node(&mut self, index: usize) -> Result<N, EvaluationError>;

    /// The captured tree of a fragment-kind result.
    fn fragment(&mut self) -> Option<Rc<ResultTree>> {
        None
    }
}

/// A compiled pattern. Only the evaluator that produced it knows how to test it.
pub trait Pattern<N: TreeNode>: fmt::Debug {
    fn source(&self) -> &str;

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLevel {
    Single,
    Multiple,
    Any,
}

/// Starts pattern operations over a batch of patterns tried as one prioritized set.
pub trait PatternEvaluator<N: TreeNode> {
    fn start_match(&self, node: N, patterns: &[PatternRef<N>]) -> Box<dyn PatternMatch<N>>;

    /// Document-order search of `root`'s tree for nodes matching any pattern.
    fn start_search(&self, root: N, patterns: &[PatternRef<N>]) -> Box<dyn PatternSearch<N>>;

    /// Computes the `xsl:number` counts for `node`. With no `count` patterns the
    /// evaluator counts nodes of the same type and name as `node`.
    fn start_count(
        &self,
        node: N,
        level: CountLevel,
        count: &[PatternRef<N>],
        from: &[PatternRef<N>],
    ) -> Box<dyn PatternCount<N>>;
}

pub trait PatternMatch<N: TreeNode>: CostLimited {
    /// Index (within the batch) of the first pattern that matched.
    fn matched(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<usize>>;
}

pub trait PatternSearch<N: TreeNode>: CostLimited {
    fn next_node(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<N>>;
}

pub trait PatternCount<N: TreeNode>: CostLimited {
    fn counts(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<Vec<usize>>;
}

/// Joins the sources of a pattern batch the way they were written: `a | b`.
pub fn describe_patterns<N: TreeNode>(patterns: &[PatternRef<N>]) -> String {
    patterns.iter().map(|pattern| pattern.source()).join(" | ")
}
