//! Execution frames: one per running program invocation.
//!
//! A frame owns everything its program has in progress: the instruction pointer, the
//! context node, the scratch registers instructions communicate through, the node
//! source of a running loop and at most one in-flight evaluator operation. Dropping a
//! frame releases all of it.

use crate::ast::VariableDecl;
use crate::evaluator::{Evaluation, ExprRef, PatternCount, PatternMatch, PatternSearch};
use crate::nodelist::NodeList;
use crate::program::Program;
use crate::sort::{SortOverride, SortState};
use crate::value::Value;
use crate::variables::{ScopeRef, StageRef};
use std::rc::Rc;
use xslvm_datasource::{ExpandedName, QualifiedName, TreeNode};

/// Where a loop instruction pulls its nodes from.
pub(crate) enum NodeSource<N: TreeNode> {
    /// A materialized list, read from the frame's `consumed` index on.
    List(NodeList<N>),
    /// A node-set evaluated lazily, one node per pull.
    Evaluation {
        handle: Box<dyn Evaluation<N>>,
        expr: ExprRef<N>,
    },
    /// A document-order pattern search (key programs).
    Search {
        handle: Box<dyn PatternSearch<N>>,
        description: String,
    },
    /// The children of the context node. With `merge_text` a run of adjacent text
    /// nodes is visited once, through its first node.
    Children { next: Option<N>, merge_text: bool },
}

/// The one evaluator operation a frame may have outstanding.
pub(crate) enum InFlight<N: TreeNode> {
    Evaluation(Box<dyn Evaluation<N>>),
    Match(Box<dyn PatternMatch<N>>),
    Count(Box<dyn PatternCount<N>>),
    Sort(Box<SortState<N>>),
    /// A key's `use` expression running for `node`.
    Key {
        node: N,
        evaluation: Box<dyn Evaluation<N>>,
    },
}

pub(crate) struct Frame<N: TreeNode> {
    pub program: Rc<Program<N>>,
    pub ip: usize,
    pub node: N,
    pub position: usize,
    /// `None` until the context size is asked for.
    pub size: Option<usize>,
    /// Pushed with the caller's context (same node, position and size) rather than
    /// by a loop over a new node list.
    pub inherits_context: bool,
    /// Visited by a child loop that skips the text nodes following this one, so the
    /// node stands for the whole run of adjacent text.
    pub text_run: bool,

    pub string: String,
    pub name: QualifiedName,
    pub condition: bool,
    pub number: f64,
    pub counts: Vec<usize>,
    pub value: Option<Value<N>>,

    pub source: Option<NodeSource<N>>,
    /// Nodes pulled from `source` so far.
    pub consumed: usize,
    /// Partial result of draining an iterator source to learn its size.
    pub drained: Option<NodeList<N>>,
    pub in_flight: Option<InFlight<N>>,
    pub sort_overrides: Vec<SortOverride>,
    pub awaiting_return: bool,

    pub scope: ScopeRef<N>,
    /// Parameters staged for the next call this frame makes.
    pub params: Option<StageRef<N>>,
    /// Parameters the caller passed to this frame.
    pub incoming: Option<StageRef<N>>,

    /// Collector depth when the frame was pushed.
    pub collector_depth: usize,
    /// Depth of the open-element stack when the frame was pushed.
    pub element_depth: usize,
    /// The top-level variable this frame computes.
    pub computing: Option<Rc<VariableDecl<N>>>,
    /// The key table this frame fills.
    pub building_key: Option<(ExpandedName, N)>,
}

impl<N: TreeNode> Frame<N> {
    pub fn new(program: Rc<Program<N>>, node: N, scope: ScopeRef<N>) -> Self {
        Self {
            program,
            ip: 0,
            node,
            position: 1,
            size: Some(1),
            inherits_context: false,
            text_run: false,
            string: String::new(),
            name: QualifiedName::default(),
            condition: false,
            number: 0.0,
            counts: Vec::new(),
            value: None,
            source: None,
            consumed: 0,
            drained: None,
            in_flight: None,
            sort_overrides: Vec::new(),
            awaiting_return: false,
            scope,
            params: None,
            incoming: None,
            collector_depth: 0,
            element_depth: 0,
            computing: None,
            building_key: None,
        }
    }

    /// A frame for the next node of a loop: position and size come from the loop.
    pub fn in_loop(mut self, position: usize, size: Option<usize>) -> Self {
        self.position = position;
        self.size = size;
        self
    }

    /// A frame running on the caller's context.
    pub fn on_context_of(mut self, caller: &Frame<N>) -> Self {
        self.position = caller.position;
        self.size = caller.size;
        self.inherits_context = true;
        self.text_run = caller.text_run;
        self
    }

    /// A frame for a text node that a merging child loop visits once per run.
    pub fn for_text_run(mut self) -> Self {
        self.text_run = self.node.is_text();
        self
    }

    pub fn with_incoming(mut self, incoming: Option<StageRef<N>>) -> Self {
        self.incoming = incoming;
        self
    }

    /// Size of the loop source when it is already known without further work.
    pub fn known_source_size(&self) -> Option<usize> {
        match &self.source {
            Some(NodeSource::List(nodes)) => Some(nodes.count()),
            _ => None,
        }
    }

    /// Forgets the loop state after the source is exhausted or abandoned.
    pub fn end_loop(&mut self) {
        self.source = None;
        self.drained = None;
        self.consumed = 0;
        self.awaiting_return = false;
    }
}
