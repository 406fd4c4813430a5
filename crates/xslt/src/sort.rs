//! The resumable multi-key sort.
//!
//! A [`SortState`] sorts by one clause. It first evaluates that clause's key for every
//! node, pausing whenever an evaluation is pending or the budget runs out, then orders
//! the nodes with a stable merge sort. Runs of equal keys are handed, one at a time, to
//! a secondary state for the next clause, which follows the same discipline. The
//! result is a permutation of the input positions.

use crate::ast::{CaseOrder, SortDataType, SortOrder, SortParameter, SortSpec};
use crate::error::{EvaluationTarget, XsltError};
use crate::evaluator::{
    EvalPoll, Evaluation, EvaluationContext, EvaluationHost, ExprRef, RequestedShape,
};
use crate::resumable::{Budget, Query, Resumable};
use crate::value::Value;
use std::cmp::Ordering;
use std::ops::Range;
use std::rc::Rc;
use std::task::Poll;
use xslvm_datasource::{ExpandedName, TreeNode};

/// A sort parameter computed at run time for one clause.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SortOverride {
    pub clause: usize,
    pub parameter: SortParameter,
    pub value: String,
}

/// A clause with every parameter known.
#[derive(Debug, Clone)]
pub struct ResolvedClause<N: TreeNode> {
    pub select: ExprRef<N>,
    pub order: SortOrder,
    pub data_type: SortDataType,
    pub case_order: CaseOrder,
    pub lang: Option<String>,
}

/// Applies run-time parameters on top of the literal ones.
pub(crate) fn resolve_clauses<N: TreeNode>(
    spec: &SortSpec<N>,
    overrides: &[SortOverride],
) -> Result<Rc<[ResolvedClause<N>]>, XsltError> {
    let mut clauses: Vec<ResolvedClause<N>> = spec
        .clauses
        .iter()
        .map(|clause| ResolvedClause {
            select: Rc::clone(&clause.select),
            order: clause.order,
            data_type: clause.data_type,
            case_order: clause.case_order,
            lang: clause.lang.clone(),
        })
        .collect();
    for o in overrides {
        let Some(clause) = clauses.get_mut(o.clause) else {
            return Err(XsltError::structural(format!("invalid sort clause {}", o.clause)));
        };
        let value = o.value.trim();
        match o.parameter {
            SortParameter::Order => {
                clause.order = match value {
                    "ascending" => SortOrder::Ascending,
                    "descending" => SortOrder::Descending,
                    _ => return Err(invalid_parameter("order", value)),
                }
            }
            SortParameter::DataType => {
                clause.data_type = match value {
                    "text" => SortDataType::Text,
                    "number" => SortDataType::Number,
                    other if other.contains(':') => {
                        log::warn!("Unsupported sort data-type '{}', sorting as text", other);
                        SortDataType::Text
                    }
                    _ => return Err(invalid_parameter("data-type", value)),
                }
            }
            SortParameter::CaseOrder => {
                clause.case_order = match value {
                    "upper-first" => CaseOrder::UpperFirst,
                    "lower-first" => CaseOrder::LowerFirst,
                    _ => return Err(invalid_parameter("case-order", value)),
                }
            }
            SortParameter::Lang => clause.lang = Some(value.to_string()),
        }
    }
    Ok(clauses.into())
}

fn invalid_parameter(parameter: &str, value: &str) -> XsltError {
    XsltError::structural(format!("invalid value '{}' for sort {}", value, parameter))
}

#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Text(String),
    Number(f64),
}

/// Case-insensitive comparison first; among keys equal ignoring case, the first
/// position where the case differs decides according to `case_order`.
pub fn compare_text(a: &str, b: &str, case_order: CaseOrder) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    if folded != Ordering::Equal {
        return folded;
    }
    for (x, y) in a.chars().zip(b.chars()) {
        if x == y {
            continue;
        }
        let upper_before_lower = if x.is_uppercase() && !y.is_uppercase() {
            Ordering::Less
        } else if y.is_uppercase() && !x.is_uppercase() {
            Ordering::Greater
        } else {
            x.cmp(&y)
        };
        return match case_order {
            CaseOrder::UpperFirst => upper_before_lower,
            CaseOrder::LowerFirst => upper_before_lower.reverse(),
        };
    }
    a.len().cmp(&b.len())
}

/// NaN sorts before every number, and equal to another NaN.
pub fn compare_numbers(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

fn compare_keys<N: TreeNode>(a: &SortKey, b: &SortKey, clause: &ResolvedClause<N>) -> Ordering {
    let ordering = match (a, b) {
        (SortKey::Number(a), SortKey::Number(b)) => compare_numbers(*a, *b),
        (SortKey::Text(a), SortKey::Text(b)) => compare_text(a, b, clause.case_order),
        // A clause's keys all have the clause's type.
        (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
        (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
    };
    match clause.order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

/// What a merge sort of `n` elements is charged.
fn sort_cost(n: usize) -> i64 {
    let n = n as i64;
    let depth = 64 - (n.max(1) as u64).leading_zeros() as i64;
    n * depth
}

/// Evaluation host seen by per-node key expressions (sort keys, key `use` values):
/// `current()` is the node whose key is being computed.
pub(crate) struct KeyHost<'h, N: TreeNode> {
    pub inner: &'h mut dyn EvaluationHost<N>,
    pub current: N,
}

impl<N: TreeNode> EvaluationHost<N> for KeyHost<'_, N> {
    fn current_node(&self) -> Option<N> {
        Some(self.current.clone())
    }

    fn variable(&mut self, decl: &Rc<crate::ast::VariableDecl<N>>) -> EvalPoll<Value<N>> {
        self.inner.variable(decl)
    }

    fn keyed_nodes(&mut self, name: &ExpandedName, node: &N, value: &str) -> EvalPoll<Vec<N>> {
        self.inner.keyed_nodes(name, node, value)
    }

    fn set_blocked(&mut self) {
        self.inner.set_blocked()
    }
}

/// Sort state for one clause of the chain.
pub struct SortState<N: TreeNode> {
    clauses: Rc<[ResolvedClause<N>]>,
    level: usize,
    nodes: Vec<N>,
    keys: Vec<SortKey>,
    pending: Option<Box<dyn Evaluation<N>>>,
    order: Option<Vec<usize>>,
    ties: Vec<Range<usize>>,
    secondary: Option<Box<SortState<N>>>,
}

impl<N: TreeNode> SortState<N> {
    pub fn new(nodes: Vec<N>, clauses: Rc<[ResolvedClause<N>]>) -> Self {
        Self::at_level(nodes, clauses, 0)
    }

    fn at_level(nodes: Vec<N>, clauses: Rc<[ResolvedClause<N>]>, level: usize) -> Self {
        Self {
            keys: Vec::with_capacity(nodes.len()),
            clauses,
            level,
            nodes,
            pending: None,
            order: None,
            ties: Vec::new(),
            secondary: None,
        }
    }

    /// Evaluates the keys still missing. Stops after any key once the budget is
    /// spent, so every call makes progress.
    fn evaluate_keys(
        &mut self,
        clause: &ResolvedClause<N>,
        host: &mut dyn EvaluationHost<N>,
        budget: &mut Budget,
    ) -> Result<Poll<()>, XsltError> {
        let size = self.nodes.len();
        while let Some(node) = self.nodes.get(self.keys.len()).cloned() {
            let position = self.keys.len() + 1;
            let mut handle = match self.pending.take() {
                Some(handle) => handle,
                None => {
                    let shape = match clause.data_type {
                        SortDataType::Text => RequestedShape::String,
                        SortDataType::Number => RequestedShape::Number,
                    };
                    clause
                        .select
                        .start(EvaluationContext::new(node.clone(), position, size), shape)
                }
            };
            let mut key_host = KeyHost {
                inner: &mut *host,
                current: node,
            };
            let source = clause.select.source();
            let key = match clause.data_type {
                SortDataType::Text => Query::new(
                    handle.as_mut(),
                    |h, host| h.string(host),
                    EvaluationTarget::Expression,
                    source,
                )
                .resume(&mut key_host, budget)?
                .map(SortKey::Text),
                SortDataType::Number => Query::new(
                    handle.as_mut(),
                    |h, host| h.number(host),
                    EvaluationTarget::Expression,
                    source,
                )
                .resume(&mut key_host, budget)?
                .map(SortKey::Number),
            };
            match key {
                Poll::Ready(key) => self.keys.push(key),
                Poll::Pending => {
                    self.pending = Some(handle);
                    return Ok(Poll::Pending);
                }
            }
            if budget.is_exhausted() && self.keys.len() < size {
                return Ok(Poll::Pending);
            }
        }
        Ok(Poll::Ready(()))
    }

    fn order_by_keys(&mut self, clause: &ResolvedClause<N>, budget: &mut Budget) -> Vec<usize> {
        let keys = &self.keys;
        let mut order: Vec<usize> = (0..keys.len()).collect();
        // `sort_by` is a stable merge sort: equal keys keep their input order.
        order.sort_by(|&a, &b| compare_keys(&keys[a], &keys[b], clause));
        budget.charge(sort_cost(order.len()));

        if self.level + 1 < self.clauses.len() {
            let mut start = 0;
            for end in 1..=order.len() {
                let run_ends = end == order.len()
                    || compare_keys(&keys[order[start]], &keys[order[end]], clause)
                        != std::cmp::Ordering::Equal;
                if run_ends {
                    if end - start > 1 {
                        self.ties.push(start..end);
                    }
                    start = end;
                }
            }
        }
        order
    }
}

impl<N: TreeNode> Resumable<N> for SortState<N> {
    type Output = Vec<usize>;

    fn resume(
        &mut self,
        host: &mut dyn EvaluationHost<N>,
        budget: &mut Budget,
    ) -> Result<Poll<Vec<usize>>, XsltError> {
        let clauses = Rc::clone(&self.clauses);
        let Some(clause) = clauses.get(self.level) else {
            return Ok(Poll::Ready((0..self.nodes.len()).collect()));
        };

        if self.order.is_none() {
            if self.evaluate_keys(clause, host, budget)?.is_pending() {
                return Ok(Poll::Pending);
            }
            let order = self.order_by_keys(clause, budget);
            self.order = Some(order);
        }

        while let Some(range) = self.ties.last().cloned() {
            let Some(order) = self.order.as_mut() else {
                break;
            };
            if self.secondary.is_none() {
                let nodes = order[range.clone()]
                    .iter()
                    .map(|&i| self.nodes[i].clone())
                    .collect();
                self.secondary = Some(Box::new(SortState::at_level(
                    nodes,
                    Rc::clone(&clauses),
                    self.level + 1,
                )));
            }
            let Some(secondary) = self.secondary.as_mut() else {
                break;
            };
            let Poll::Ready(permutation) = secondary.resume(host, budget)? else {
                return Ok(Poll::Pending);
            };
            let group: Vec<usize> = order[range.clone()].to_vec();
            for (offset, from) in permutation.into_iter().enumerate() {
                order[range.start + offset] = group[from];
            }
            self.secondary = None;
            self.ties.pop();
        }

        Ok(Poll::Ready(self.order.take().unwrap_or_default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{SortClause, SortSpec};
    use crate::testing::{NullHost, Probe, ScriptedExpression};
    use xslvm_datasource::tests::{MockNode, MockTreeBuilder};

    /// One element per key, carrying the key as its string value.
    fn keyed_nodes(keys: &[&str]) -> Vec<MockNode> {
        let mut builder = MockTreeBuilder::new();
        let root = builder.root();
        let ids: Vec<usize> = keys
            .iter()
            .map(|key| builder.text_element(root, "item", key))
            .collect();
        let tree = builder.build();
        ids.into_iter().map(|id| tree.node(id)).collect()
    }

    fn run(state: &mut SortState<MockNode>, slice: i64) -> Vec<usize> {
        let mut host = NullHost;
        for _ in 0..10_000 {
            let mut budget = Budget::new(slice);
            if let Poll::Ready(order) = state.resume(&mut host, &mut budget).unwrap() {
                return order;
            }
        }
        panic!("sort did not finish");
    }

    fn sorted_strings(nodes: &[MockNode], order: &[usize]) -> Vec<String> {
        order.iter().map(|&i| nodes[i].string_value()).collect()
    }

    fn clause_on<F>(source: &str, f: F) -> SortClause<MockNode>
    where
        F: Fn(&MockNode) -> String + 'static,
    {
        SortClause::new(ScriptedExpression::string_of(source, move |ctx| f(&ctx.node)).build())
    }

    #[test]
    fn test_numeric_descending_is_stable() {
        let nodes = keyed_nodes(&["3", "1a", "4", "1b", "5"]);
        let spec = SortSpec::new(vec![
            clause_on(".", |node| node.string_value().trim_end_matches(['a', 'b']).to_string())
                .numeric()
                .descending(),
        ]);
        let clauses = resolve_clauses(&spec, &[]).unwrap();
        let order = run(&mut SortState::new(nodes.clone(), clauses), 100);
        assert_eq!(sorted_strings(&nodes, &order), ["5", "4", "3", "1a", "1b"]);
    }

    #[test]
    fn test_nan_sorts_first() {
        let nodes = keyed_nodes(&["2", "x", "1"]);
        let spec = SortSpec::new(vec![clause_on(".", |node| node.string_value()).numeric()]);
        let order = run(
            &mut SortState::new(nodes.clone(), resolve_clauses(&spec, &[]).unwrap()),
            100,
        );
        assert_eq!(sorted_strings(&nodes, &order), ["x", "1", "2"]);
    }

    #[test]
    fn test_secondary_key_orders_ties_only() {
        // Primary: letter; secondary: digit, descending.
        let nodes = keyed_nodes(&["b1", "a1", "b3", "a2", "b2"]);
        let primary = clause_on("substring(., 1, 1)", |node| node.string_value()[..1].to_string());
        let secondary = clause_on("substring(., 2)", |node| node.string_value()[1..].to_string())
            .numeric()
            .descending();
        let spec = SortSpec::new(vec![primary.clone(), secondary.clone()]);
        let order = run(
            &mut SortState::new(nodes.clone(), resolve_clauses(&spec, &[]).unwrap()),
            1,
        );
        assert_eq!(sorted_strings(&nodes, &order), ["a2", "a1", "b3", "b2", "b1"]);

        let reversed = SortSpec::new(vec![primary.descending(), secondary]);
        let order = run(
            &mut SortState::new(nodes.clone(), resolve_clauses(&reversed, &[]).unwrap()),
            1,
        );
        assert_eq!(sorted_strings(&nodes, &order), ["b3", "b2", "b1", "a2", "a1"]);
    }

    #[test]
    fn test_case_order_breaks_case_insensitive_ties() {
        assert_eq!(compare_text("a", "B", CaseOrder::UpperFirst), Ordering::Less);
        assert_eq!(compare_text("A", "a", CaseOrder::UpperFirst), Ordering::Less);
        assert_eq!(compare_text("A", "a", CaseOrder::LowerFirst), Ordering::Greater);
        assert_eq!(compare_text("ab", "ab", CaseOrder::LowerFirst), Ordering::Equal);
    }

    #[test]
    fn test_pending_keys_resume_where_they_stopped() {
        let probe = Probe::new();
        probe.inject_pending(2);
        let nodes = keyed_nodes(&["c", "a", "b"]);
        let spec = SortSpec::new(vec![SortClause::new(
            ScriptedExpression::<MockNode>::string_of(".", |ctx| ctx.node.string_value())
                .probed(&probe)
                .build(),
        )]);
        let order = run(
            &mut SortState::new(nodes.clone(), resolve_clauses(&spec, &[]).unwrap()),
            1_000,
        );
        assert_eq!(sorted_strings(&nodes, &order), ["a", "b", "c"]);
        assert_eq!(probe.started(), 3, "each key is evaluated exactly once");
        assert_eq!(probe.live(), 0);
    }

    #[test]
    fn test_overrides_replace_literal_settings() {
        let spec = SortSpec::new(vec![clause_on(".", |node| node.string_value())]);
        let overrides = [
            SortOverride {
                clause: 0,
                parameter: SortParameter::Order,
                value: "descending".into(),
            },
            SortOverride {
                clause: 0,
                parameter: SortParameter::DataType,
                value: " number ".into(),
            },
        ];
        let clauses = resolve_clauses(&spec, &overrides).unwrap();
        assert_eq!(clauses[0].order, SortOrder::Descending);
        assert_eq!(clauses[0].data_type, SortDataType::Number);

        let bad = [SortOverride {
            clause: 0,
            parameter: SortParameter::CaseOrder,
            value: "sideways".into(),
        }];
        assert!(resolve_clauses(&spec, &bad).is_err());
    }
}
