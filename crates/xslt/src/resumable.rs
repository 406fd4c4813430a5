//! Cooperative scheduling primitives.
//!
//! Everything that can pause implements [`Resumable`]: it is created once, then
//! resumed with the remaining [`Budget`] until it answers `Ready`. A `Pending` answer
//! leaves the operation's progress inside the operation itself, so the next `resume`
//! picks up exactly where the previous one stopped.

use crate::error::{EvaluationError, EvaluationTarget, XsltError};
use crate::evaluator::{CostLimited, EvalPoll, Evaluation, EvaluationHost, ResultKind};
use crate::result_tree::ResultTree;
use std::rc::Rc;
use std::task::Poll;
use xslvm_datasource::TreeNode;

/// Cost units left in the current slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    remaining: i64,
}

impl Budget {
    pub fn new(limit: i64) -> Self {
        Self { remaining: limit }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn charge(&mut self, cost: i64) {
        self.remaining = self.remaining.saturating_sub(cost.max(0));
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

pub trait Resumable<N: TreeNode> {
    type Output;

    fn resume(
        &mut self,
        host: &mut dyn EvaluationHost<N>,
        budget: &mut Budget,
    ) -> Result<Poll<Self::Output>, XsltError>;
}

/// One poll of an evaluator handle: hand it the budget, ask, charge what it spent.
pub struct Query<'q, N: TreeNode, H: ?Sized, T> {
    handle: &'q mut H,
    poll: fn(&mut H, &mut dyn EvaluationHost<N>) -> EvalPoll<T>,
    target: EvaluationTarget,
    source: &'q str,
}

impl<'q, N: TreeNode, H: ?Sized + CostLimited, T> Query<'q, N, H, T> {
    pub fn new(
        handle: &'q mut H,
        poll: fn(&mut H, &mut dyn EvaluationHost<N>) -> EvalPoll<T>,
        target: EvaluationTarget,
        source: &'q str,
    ) -> Self {
        Self {
            handle,
            poll,
            target,
            source,
        }
    }
}

impl<N: TreeNode, H: ?Sized + CostLimited, T> Resumable<N> for Query<'_, N, H, T> {
    type Output = T;

    fn resume(
        &mut self,
        host: &mut dyn EvaluationHost<N>,
        budget: &mut Budget,
    ) -> Result<Poll<T>, XsltError> {
        self.handle.set_cost_limit(budget.remaining().max(1));
        let outcome = (self.poll)(&mut *self.handle, host);
        budget.charge(self.handle.last_operation_cost());
        outcome.map_err(|err| XsltError::evaluation(self.target, self.source, err, None))
    }
}

/// An evaluation whose result is read in steps: first its kind, then the value of
/// that kind. The kind is asked for once, so a `Pending` answer from a later step
/// resumes that step alone. `last_operation_cost` covers every step taken since the
/// last `set_cost_limit`.
pub struct StagedEvaluation<N: TreeNode> {
    inner: Box<dyn Evaluation<N>>,
    kind: Option<ResultKind>,
    limit: i64,
    spent: i64,
}

impl<N: TreeNode> StagedEvaluation<N> {
    pub fn new(inner: Box<dyn Evaluation<N>>) -> Self {
        Self {
            inner,
            kind: None,
            limit: i64::MAX,
            spent: 0,
        }
    }

    fn step<T>(
        &mut self,
        host: &mut dyn EvaluationHost<N>,
        poll: impl FnOnce(&mut dyn Evaluation<N>, &mut dyn EvaluationHost<N>) -> EvalPoll<T>,
    ) -> EvalPoll<T> {
        self.inner
            .set_cost_limit(self.limit.saturating_sub(self.spent).max(1));
        let outcome = poll(self.inner.as_mut(), host);
        self.spent = self
            .spent
            .saturating_add(self.inner.last_operation_cost().max(0));
        outcome
    }
}

impl<N: TreeNode> CostLimited for StagedEvaluation<N> {
    fn set_cost_limit(&mut self, limit: i64) {
        self.limit = limit;
        self.spent = 0;
    }

    fn last_operation_cost(&self) -> i64 {
        self.spent
    }
}

impl<N: TreeNode> Evaluation<N> for StagedEvaluation<N> {
    fn result_kind(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<ResultKind> {
        if let Some(kind) = self.kind {
            return Ok(Poll::Ready(kind));
        }
        let kind = self.step(host, |inner, host| inner.result_kind(host))?;
        if let Poll::Ready(kind) = kind {
            self.kind = Some(kind);
        }
        Ok(kind)
    }

    fn number(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<f64> {
        self.step(host, |inner, host| inner.number(host))
    }

    fn boolean(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<bool> {
        self.step(host, |inner, host| inner.boolean(host))
    }

    fn string(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<String> {
        self.step(host, |inner, host| inner.string(host))
    }

    fn next_node(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<N>> {
        self.step(host, |inner, host| inner.next_node(host))
    }

    fn node_count(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<usize> {
        self.step(host, |inner, host| inner.node_count(host))
    }

    fn node(&mut self, index: usize) -> Result<N, EvaluationError> {
        self.inner.node(index)
    }

    fn fragment(&mut self) -> Option<Rc<ResultTree>> {
        self.inner.fragment()
    }
}
