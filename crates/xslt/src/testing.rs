//! A scripted evaluator for tests and benches.
//!
//! Expressions are Rust closures over the evaluation context (and, when they need
//! variables or keys, the host). Patterns are closures over nodes. A [`Probe`] shared
//! by several handles counts what they do and can make every other poll answer
//! `Pending`, which is how tests drive the engine through its suspension paths.

use crate::ast::VariableDecl;
use crate::error::EvaluationError;
use crate::evaluator::{
    CostLimited, CountLevel, EvalPoll, Evaluation, EvaluationContext, EvaluationHost,
    Expression, ExprRef, Pattern, PatternCount, PatternEvaluator, PatternMatch, PatternRef,
    PatternSearch, RequestedShape, ResultKind,
};
use crate::result_tree::ResultTree;
use crate::value::Value;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::task::Poll;
use xslvm_datasource::{ExpandedName, NodeType, TreeNode};

#[derive(Debug, Default)]
struct ProbeState {
    pend_every: Cell<usize>,
    polls: Cell<usize>,
    started: Cell<usize>,
    live: Cell<usize>,
    searches: Cell<usize>,
}

/// Shared counters and fault injection for scripted handles.
#[derive(Debug, Clone, Default)]
pub struct Probe(Rc<ProbeState>);

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes one poll in every `every` answer `Pending` before doing any work.
    pub fn inject_pending(&self, every: usize) {
        self.0.pend_every.set(every.max(2));
    }

    /// Evaluations started so far.
    pub fn started(&self) -> usize {
        self.0.started.get()
    }

    /// Evaluations started and not yet dropped.
    pub fn live(&self) -> usize {
        self.0.live.get()
    }

    /// Pattern searches started so far.
    pub fn searches(&self) -> usize {
        self.0.searches.get()
    }

    pub fn polls(&self) -> usize {
        self.0.polls.get()
    }

    fn should_pend(&self) -> bool {
        let polls = self.0.polls.get() + 1;
        self.0.polls.set(polls);
        let every = self.0.pend_every.get();
        every > 0 && polls % every == 1
    }

    fn opened(&self) {
        self.0.started.set(self.0.started.get() + 1);
        self.0.live.set(self.0.live.get() + 1);
    }

    fn closed(&self) {
        self.0.live.set(self.0.live.get().saturating_sub(1));
    }
}

fn pend(probe: &Option<Probe>) -> bool {
    probe.as_ref().is_some_and(Probe::should_pend)
}

type Script<N> =
    Rc<dyn Fn(&EvaluationContext<N>, &mut dyn EvaluationHost<N>) -> EvalPoll<Value<N>>>;

/// An expression whose value is computed by a closure.
pub struct ScriptedExpression<N: TreeNode> {
    source: String,
    needs_size: bool,
    script: Script<N>,
    probe: Option<Probe>,
}

impl<N: TreeNode> fmt::Debug for ScriptedExpression<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedExpression")
            .field("source", &self.source)
            .field("needs_size", &self.needs_size)
            .finish()
    }
}

impl<N: TreeNode> ScriptedExpression<N> {
    pub fn new<F>(source: &str, script: F) -> Self
    where
        F: Fn(&EvaluationContext<N>, &mut dyn EvaluationHost<N>) -> EvalPoll<Value<N>> + 'static,
    {
        Self {
            source: source.to_string(),
            needs_size: false,
            script: Rc::new(script),
            probe: None,
        }
    }

    pub fn constant(source: &str, value: Value<N>) -> Self {
        Self::new(source, move |_, _| Ok(Poll::Ready(value.clone())))
    }

    pub fn constant_string(source: &str, value: &str) -> Self {
        Self::constant(source, Value::String(value.to_string()))
    }

    pub fn string_of<F>(source: &str, f: F) -> Self
    where
        F: Fn(&EvaluationContext<N>) -> String + 'static,
    {
        Self::new(source, move |ctx, _| Ok(Poll::Ready(Value::String(f(ctx)))))
    }

    pub fn number_of<F>(source: &str, f: F) -> Self
    where
        F: Fn(&EvaluationContext<N>) -> f64 + 'static,
    {
        Self::new(source, move |ctx, _| Ok(Poll::Ready(Value::Number(f(ctx)))))
    }

    pub fn boolean_of<F>(source: &str, f: F) -> Self
    where
        F: Fn(&EvaluationContext<N>) -> bool + 'static,
    {
        Self::new(source, move |ctx, _| Ok(Poll::Ready(Value::Boolean(f(ctx)))))
    }

    pub fn nodes_of<F>(source: &str, f: F) -> Self
    where
        F: Fn(&EvaluationContext<N>) -> Vec<N> + 'static,
    {
        Self::new(source, move |ctx, _| Ok(Poll::Ready(Value::nodes(f(ctx)))))
    }

    /// `node()`: every child of the context node.
    pub fn children() -> Self {
        Self::nodes_of("node()", |ctx| ctx.node.children().collect())
    }

    /// `*`: the element children of the context node.
    pub fn child_elements() -> Self {
        Self::nodes_of("*", |ctx| {
            ctx.node
                .children()
                .filter(|child| child.node_type() == NodeType::Element)
                .collect()
        })
    }

    /// `$name`, read through the host.
    pub fn variable(decl: &Rc<VariableDecl<N>>) -> Self {
        let decl = Rc::clone(decl);
        Self::new(&format!("${}", decl.name), move |_, host| host.variable(&decl))
    }

    pub fn position() -> Self {
        Self::number_of("position()", |ctx| ctx.position as f64)
    }

    pub fn last() -> Self {
        Self::number_of("last()", |ctx| ctx.size as f64).with_context_size()
    }

    /// `current()`, as the host reports it.
    pub fn current() -> Self {
        Self::new("current()", |_, host| {
            Ok(Poll::Ready(Value::nodes(host.current_node())))
        })
    }

    /// `key('name', 'value')`.
    pub fn key(name: &str, value: &str) -> Self {
        let key = ExpandedName::new(name);
        let value = value.to_string();
        Self::new(&format!("key('{}', '{}')", name, value), move |ctx, host| {
            Ok(host
                .keyed_nodes(&key, &ctx.node, &value)?
                .map(|nodes| Value::nodes(nodes)))
        })
    }

    pub fn with_context_size(mut self) -> Self {
        self.needs_size = true;
        self
    }

    pub fn probed(mut self, probe: &Probe) -> Self {
        self.probe = Some(probe.clone());
        self
    }

    pub fn build(self) -> ExprRef<N> {
        Rc::new(self)
    }
}

impl<N: TreeNode> Expression<N> for ScriptedExpression<N> {
    fn source(&self) -> &str {
        &self.source
    }

    fn needs_context_size(&self) -> bool {
        self.needs_size
    }

    fn start(
        &self,
        context: EvaluationContext<N>,
        shape: RequestedShape,
    ) -> Box<dyn Evaluation<N>> {
        if let Some(probe) = &self.probe {
            probe.opened();
        }
        Box::new(ScriptedEvaluation {
            context,
            shape,
            script: Rc::clone(&self.script),
            probe: self.probe.clone(),
            value: None,
            cursor: 0,
            cost: 0,
        })
    }
}

/// Runs the script once and answers every accessor from the cached value.
struct ScriptedEvaluation<N: TreeNode> {
    context: EvaluationContext<N>,
    shape: RequestedShape,
    script: Script<N>,
    probe: Option<Probe>,
    value: Option<Value<N>>,
    cursor: usize,
    cost: i64,
}

impl<N: TreeNode> ScriptedEvaluation<N> {
    fn compute(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<&Value<N>> {
        self.cost = 1;
        if pend(&self.probe) {
            return Ok(Poll::Pending);
        }
        if self.value.is_none() {
            match (self.script)(&self.context, host)? {
                Poll::Ready(value) => self.value = Some(value),
                Poll::Pending => return Ok(Poll::Pending),
            }
        }
        match &self.value {
            Some(value) => Ok(Poll::Ready(value)),
            None => Ok(Poll::Pending),
        }
    }

    fn node_set(&self) -> Result<&Value<N>, EvaluationError> {
        match &self.value {
            Some(value @ Value::NodeSet(_)) => Ok(value),
            Some(_) => Err(EvaluationError::new(format!(
                "expression does not evaluate to a node-set (requested {:?})",
                self.shape
            ))),
            None => Err(EvaluationError::new("node requested before the value is ready")),
        }
    }
}

impl<N: TreeNode> Drop for ScriptedEvaluation<N> {
    fn drop(&mut self) {
        if let Some(probe) = &self.probe {
            probe.closed();
        }
    }
}

impl<N: TreeNode> CostLimited for ScriptedEvaluation<N> {
    fn set_cost_limit(&mut self, _limit: i64) {}

    fn last_operation_cost(&self) -> i64 {
        self.cost
    }
}

impl<N: TreeNode> Evaluation<N> for ScriptedEvaluation<N> {
    fn result_kind(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<ResultKind> {
        Ok(self.compute(host)?.map(|value| match value {
            Value::String(_) => ResultKind::String,
            Value::Number(_) => ResultKind::Number,
            Value::Boolean(_) => ResultKind::Boolean,
            Value::Fragment(_) => ResultKind::Fragment,
            Value::NodeSet(_) => ResultKind::NodeSet,
        }))
    }

    fn number(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<f64> {
        Ok(self.compute(host)?.map(Value::to_number))
    }

    fn boolean(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<bool> {
        Ok(self.compute(host)?.map(Value::to_boolean))
    }

    fn string(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<String> {
        Ok(self.compute(host)?.map(Value::to_string_value))
    }

    fn next_node(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<N>> {
        if self.compute(host)?.is_pending() {
            return Ok(Poll::Pending);
        }
        let Value::NodeSet(nodes) = self.node_set()? else {
            return Ok(Poll::Ready(None));
        };
        let next = nodes.get(self.cursor).cloned();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(Poll::Ready(next))
    }

    fn node_count(&mut self, host: &mut dyn EvaluationHost<N>) -> EvalPoll<usize> {
        if self.compute(host)?.is_pending() {
            return Ok(Poll::Pending);
        }
        let Value::NodeSet(nodes) = self.node_set()? else {
            return Ok(Poll::Ready(0));
        };
        Ok(Poll::Ready(nodes.count()))
    }

    fn node(&mut self, index: usize) -> Result<N, EvaluationError> {
        let Value::NodeSet(nodes) = self.node_set()? else {
            return Err(EvaluationError::new("not a node-set"));
        };
        nodes
            .get(index)
            .cloned()
            .ok_or_else(|| EvaluationError::new(format!("node index {} out of range", index)))
    }

    fn fragment(&mut self) -> Option<Rc<ResultTree>> {
        match &self.value {
            Some(Value::Fragment(tree)) => Some(Rc::clone(tree)),
            _ => None,
        }
    }
}

/// A pattern that matches when its closure says so.
pub struct ScriptedPattern<N: TreeNode> {
    source: String,
    test: Rc<dyn Fn(&N) -> bool>,
}

impl<N: TreeNode> fmt::Debug for ScriptedPattern<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ScriptedPattern").field(&self.source).finish()
    }
}

impl<N: TreeNode> ScriptedPattern<N> {
    pub fn new<F>(source: &str, test: F) -> PatternRef<N>
    where
        F: Fn(&N) -> bool + 'static,
    {
        Rc::new(Self {
            source: source.to_string(),
            test: Rc::new(test),
        })
    }

    /// Elements with local name `local`.
    pub fn named(local: &str) -> PatternRef<N> {
        let wanted = local.to_string();
        Self::new(local, move |node| {
            node.node_type() == NodeType::Element
                && node.name().is_some_and(|name| name.local == wanted)
        })
    }

    pub fn any_element() -> PatternRef<N> {
        Self::new("*", |node| node.node_type() == NodeType::Element)
    }

    pub fn text() -> PatternRef<N> {
        Self::new("text()", |node: &N| node.is_text())
    }

    pub fn matches(&self, node: &N) -> bool {
        (self.test)(node)
    }
}

impl<N: TreeNode> Pattern<N> for ScriptedPattern<N> {
    fn source(&self) -> &str {
        &self.source
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn scripted<N: TreeNode>(pattern: &PatternRef<N>) -> Result<&ScriptedPattern<N>, EvaluationError> {
    pattern
        .as_any()
        .downcast_ref::<ScriptedPattern<N>>()
        .ok_or_else(|| {
            EvaluationError::new(format!(
                "pattern '{}' was not compiled by this evaluator",
                pattern.source()
            ))
        })
}

fn any_matches<N: TreeNode>(patterns: &[PatternRef<N>], node: &N) -> Result<bool, EvaluationError> {
    for pattern in patterns {
        if scripted(pattern)?.matches(node) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// The pattern side of the scripted evaluator.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPatterns {
    probe: Option<Probe>,
}

impl ScriptedPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probed(probe: &Probe) -> Self {
        Self {
            probe: Some(probe.clone()),
        }
    }
}

impl<N: TreeNode> PatternEvaluator<N> for ScriptedPatterns {
    fn start_match(&self, node: N, patterns: &[PatternRef<N>]) -> Box<dyn PatternMatch<N>> {
        Box::new(ScriptedMatch {
            node,
            patterns: patterns.to_vec(),
            probe: self.probe.clone(),
            cost: 0,
        })
    }

    fn start_search(&self, root: N, patterns: &[PatternRef<N>]) -> Box<dyn PatternSearch<N>> {
        if let Some(probe) = &self.probe {
            probe.0.searches.set(probe.0.searches.get() + 1);
        }
        Box::new(ScriptedSearch {
            stack: vec![root],
            patterns: patterns.to_vec(),
            probe: self.probe.clone(),
            limit: 1,
            cost: 0,
        })
    }

    fn start_count(
        &self,
        node: N,
        level: CountLevel,
        count: &[PatternRef<N>],
        from: &[PatternRef<N>],
    ) -> Box<dyn PatternCount<N>> {
        Box::new(ScriptedCount {
            node,
            level,
            count: count.to_vec(),
            from: from.to_vec(),
            probe: self.probe.clone(),
            cost: 0,
        })
    }
}

struct ScriptedMatch<N: TreeNode> {
    node: N,
    patterns: Vec<PatternRef<N>>,
    probe: Option<Probe>,
    cost: i64,
}

impl<N: TreeNode> CostLimited for ScriptedMatch<N> {
    fn set_cost_limit(&mut self, _limit: i64) {}

    fn last_operation_cost(&self) -> i64 {
        self.cost
    }
}

impl<N: TreeNode> PatternMatch<N> for ScriptedMatch<N> {
    fn matched(&mut self, _host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<usize>> {
        self.cost = 1;
        if pend(&self.probe) {
            return Ok(Poll::Pending);
        }
        for (index, pattern) in self.patterns.iter().enumerate() {
            if scripted(pattern)?.matches(&self.node) {
                return Ok(Poll::Ready(Some(index)));
            }
        }
        Ok(Poll::Ready(None))
    }
}

/// Document-order walk: a node, then its attributes, then its children.
struct ScriptedSearch<N: TreeNode> {
    stack: Vec<N>,
    patterns: Vec<PatternRef<N>>,
    probe: Option<Probe>,
    limit: i64,
    cost: i64,
}

impl<N: TreeNode> CostLimited for ScriptedSearch<N> {
    fn set_cost_limit(&mut self, limit: i64) {
        self.limit = limit.max(1);
    }

    fn last_operation_cost(&self) -> i64 {
        self.cost
    }
}

impl<N: TreeNode> PatternSearch<N> for ScriptedSearch<N> {
    fn next_node(&mut self, _host: &mut dyn EvaluationHost<N>) -> EvalPoll<Option<N>> {
        self.cost = 1;
        if pend(&self.probe) {
            return Ok(Poll::Pending);
        }
        self.cost = 0;
        while let Some(node) = self.stack.pop() {
            self.cost += 1;
            let children: Vec<N> = node.children().collect();
            self.stack.extend(children.into_iter().rev());
            self.stack.extend(node.attributes().into_iter().rev());
            if any_matches(&self.patterns, &node)? {
                return Ok(Poll::Ready(Some(node)));
            }
            if self.cost >= self.limit {
                return Ok(Poll::Pending);
            }
        }
        Ok(Poll::Ready(None))
    }
}

struct ScriptedCount<N: TreeNode> {
    node: N,
    level: CountLevel,
    count: Vec<PatternRef<N>>,
    from: Vec<PatternRef<N>>,
    probe: Option<Probe>,
    cost: i64,
}

impl<N: TreeNode> ScriptedCount<N> {
    fn counted(&self, candidate: &N) -> Result<bool, EvaluationError> {
        if self.count.is_empty() {
            return Ok(candidate.node_type() == self.node.node_type()
                && candidate.expanded_name() == self.node.expanded_name());
        }
        any_matches(&self.count, candidate)
    }

    /// Ancestor-or-self chain of the node, innermost first, cut at the first `from` match.
    fn ancestors(&self) -> Result<Vec<N>, EvaluationError> {
        let mut chain = Vec::new();
        let mut current = Some(self.node.clone());
        while let Some(node) = current {
            if !self.from.is_empty() && any_matches(&self.from, &node)? {
                break;
            }
            current = node.parent();
            chain.push(node);
        }
        Ok(chain)
    }

    fn sibling_number(&self, node: &N) -> Result<usize, EvaluationError> {
        let Some(parent) = node.parent() else {
            return Ok(1);
        };
        let mut number = 0;
        for sibling in parent.children() {
            if self.counted(&sibling)? {
                number += 1;
            }
            if &sibling == node {
                return Ok(number.max(1));
            }
        }
        Ok(1)
    }

    fn compute(&self) -> Result<Vec<usize>, EvaluationError> {
        match self.level {
            CountLevel::Single => {
                for node in self.ancestors()? {
                    if self.counted(&node)? {
                        return Ok(vec![self.sibling_number(&node)?]);
                    }
                }
                Ok(Vec::new())
            }
            CountLevel::Multiple => {
                let mut numbers = Vec::new();
                for node in self.ancestors()?.iter().rev() {
                    if self.counted(node)? {
                        numbers.push(self.sibling_number(node)?);
                    }
                }
                Ok(numbers)
            }
            CountLevel::Any => {
                let mut number = 0;
                let mut stack = vec![self.node.root()];
                while let Some(node) = stack.pop() {
                    if !self.from.is_empty() && any_matches(&self.from, &node)? {
                        number = 0;
                    }
                    if self.counted(&node)? {
                        number += 1;
                    }
                    if node == self.node {
                        break;
                    }
                    let children: Vec<N> = node.children().collect();
                    stack.extend(children.into_iter().rev());
                }
                Ok(if number == 0 { Vec::new() } else { vec![number] })
            }
        }
    }
}

impl<N: TreeNode> CostLimited for ScriptedCount<N> {
    fn set_cost_limit(&mut self, _limit: i64) {}

    fn last_operation_cost(&self) -> i64 {
        self.cost
    }
}

impl<N: TreeNode> PatternCount<N> for ScriptedCount<N> {
    fn counts(&mut self, _host: &mut dyn EvaluationHost<N>) -> EvalPoll<Vec<usize>> {
        self.cost = 1;
        if pend(&self.probe) {
            return Ok(Poll::Pending);
        }
        Ok(Poll::Ready(self.compute()?))
    }
}

/// A host with nothing to offer: no variables, no keys, no current node.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl<N: TreeNode> EvaluationHost<N> for NullHost {
    fn current_node(&self) -> Option<N> {
        None
    }

    fn variable(&mut self, decl: &Rc<VariableDecl<N>>) -> EvalPoll<Value<N>> {
        Err(EvaluationError::new(format!("variable '{}' is not bound", decl.name)))
    }

    fn keyed_nodes(&mut self, name: &ExpandedName, _node: &N, _value: &str) -> EvalPoll<Vec<N>> {
        Err(EvaluationError::new(format!("key '{}' is not available", name)))
    }

    fn set_blocked(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use xslvm_datasource::tests::{MockNode, MockTreeBuilder, create_test_tree};

    #[test]
    fn test_injected_pending_alternates_and_handles_are_counted() {
        let probe = Probe::new();
        probe.inject_pending(2);
        let tree = create_test_tree();
        let expr: ExprRef<MockNode> = ScriptedExpression::constant_string("'x'", "x")
            .probed(&probe)
            .build();
        let mut evaluation = expr.start(
            EvaluationContext::new(tree.root(), 1, 1),
            RequestedShape::String,
        );
        assert_eq!(probe.live(), 1);
        assert_eq!(evaluation.string(&mut NullHost).unwrap(), Poll::Pending);
        assert_eq!(evaluation.string(&mut NullHost).unwrap(), Poll::Ready("x".to_string()));
        drop(evaluation);
        assert_eq!(probe.live(), 0);
        assert_eq!(probe.started(), 1);
    }

    #[test]
    fn test_search_visits_document_order_under_small_limits() {
        let mut builder = MockTreeBuilder::new();
        let root = builder.root();
        let a = builder.element(root, "item");
        builder.text_element(a, "item", "inner");
        builder.element(root, "item");
        let tree = builder.build();

        let patterns = vec![ScriptedPattern::named("item")];
        let mut search = ScriptedPatterns::new().start_search(tree.root(), &patterns);
        let mut found = Vec::new();
        for _ in 0..100 {
            search.set_cost_limit(1);
            match search.next_node(&mut NullHost).unwrap() {
                Poll::Ready(Some(node)) => found.push(node),
                Poll::Ready(None) => break,
                Poll::Pending => {}
            }
        }
        assert_eq!(found.len(), 3);
        let order = tree.document_order();
        let position = |n: &MockNode| order.iter().position(|o| o == n);
        assert!(found.windows(2).all(|w| position(&w[0]) < position(&w[1])));
    }

    #[test]
    fn test_count_levels() {
        let mut builder = MockTreeBuilder::new();
        let root = builder.root();
        let chapter = builder.element(root, "chapter");
        builder.element(chapter, "section");
        let second = builder.element(chapter, "section");
        let chapter2 = builder.element(root, "chapter");
        let third = builder.element(chapter2, "section");
        let tree = builder.build();
        let patterns = ScriptedPatterns::new();

        let count = |node: usize, level: CountLevel, count: Vec<PatternRef<MockNode>>| {
            let mut handle = patterns.start_count(tree.node(node), level, &count, &[]);
            match handle.counts(&mut NullHost).unwrap() {
                Poll::Ready(counts) => counts,
                Poll::Pending => panic!("no pending injected"),
            }
        };

        assert_eq!(count(second, CountLevel::Single, vec![]), vec![2]);
        assert_eq!(count(third, CountLevel::Any, vec![]), vec![3]);
        assert_eq!(
            count(
                third,
                CountLevel::Multiple,
                vec![ScriptedPattern::named("chapter"), ScriptedPattern::named("section")]
            ),
            vec![2, 1]
        );
    }
}
