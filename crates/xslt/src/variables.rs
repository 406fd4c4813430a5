//! The variable and parameter store.
//!
//! Values live in reference-counted cells so a parameter passed to a template, a
//! variable read by several expressions and the scope that owns it can all share one
//! value. A cell's state is explicit:
//!
//! - `NeedsCalculation`: a global whose value has not been asked for yet.
//! - `BeingCalculated`: its program is running. Observing this state from an
//!   evaluation means the variable depends on itself.
//! - `Ready`: computed.
//!
//! Scopes chain to a parent; lookups walk outwards. Parameters passed with
//! `with-param` are staged in a [`ParamStage`] keyed by name until the callee frame
//! exists and claims them.

use crate::ast::{VariableDecl, VariableId};
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use xslvm_datasource::{ExpandedName, TreeNode};

#[derive(Debug, Clone)]
pub enum VariableValue<N> {
    NeedsCalculation,
    BeingCalculated,
    Ready(Value<N>),
}

pub type ValueCell<N> = Rc<RefCell<VariableValue<N>>>;

pub fn ready_cell<N>(value: Value<N>) -> ValueCell<N> {
    Rc::new(RefCell::new(VariableValue::Ready(value)))
}

pub type ScopeRef<N> = Rc<RefCell<Scope<N>>>;

#[derive(Debug)]
pub struct Scope<N> {
    cells: HashMap<VariableId, ValueCell<N>>,
    parent: Option<ScopeRef<N>>,
}

impl<N: TreeNode> Scope<N> {
    pub fn root() -> ScopeRef<N> {
        Rc::new(RefCell::new(Scope {
            cells: HashMap::new(),
            parent: None,
        }))
    }

    pub fn child(parent: &ScopeRef<N>) -> ScopeRef<N> {
        Rc::new(RefCell::new(Scope {
            cells: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }))
    }

    /// Binds `decl` in this scope, replacing any earlier binding.
    pub fn set(&mut self, decl: &VariableDecl<N>, value: VariableValue<N>) {
        self.cells
            .insert(decl.id(), Rc::new(RefCell::new(value)));
    }

    /// Binds `decl` to an existing cell, sharing the value with whoever else holds it.
    pub fn share(&mut self, decl: &VariableDecl<N>, cell: ValueCell<N>) {
        self.cells.insert(decl.id(), cell);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Finds the cell bound to `id` in `scope` or the nearest enclosing scope.
pub fn lookup<N: TreeNode>(scope: &ScopeRef<N>, id: VariableId) -> Option<ValueCell<N>> {
    let mut current = Rc::clone(scope);
    loop {
        let parent = {
            let borrowed = current.borrow();
            if let Some(cell) = borrowed.cells.get(&id) {
                return Some(Rc::clone(cell));
            }
            borrowed.parent.clone()
        };
        current = parent?;
    }
}

pub type StageRef<N> = Rc<RefCell<ParamStage<N>>>;

/// Parameters collected for an outgoing call. Stages stack: starting a new
/// collection while one is open (a call nested inside a with-param value) pushes a
/// stage, and resetting pops back to the previous one.
#[derive(Debug)]
pub struct ParamStage<N> {
    values: HashMap<ExpandedName, ValueCell<N>>,
    previous: Option<StageRef<N>>,
}

impl<N: TreeNode> ParamStage<N> {
    pub fn push(previous: Option<StageRef<N>>) -> StageRef<N> {
        Rc::new(RefCell::new(ParamStage {
            values: HashMap::new(),
            previous,
        }))
    }

    /// The stage that was open before this one.
    pub fn pop(stage: &StageRef<N>) -> Option<StageRef<N>> {
        stage.borrow().previous.clone()
    }

    pub fn set(&mut self, name: ExpandedName, value: Value<N>) {
        self.values
            .insert(name, Rc::new(RefCell::new(VariableValue::Ready(value))));
    }

    pub fn get(&self, name: &ExpandedName) -> Option<ValueCell<N>> {
        self.values.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::VariableDecl;
    use xslvm_datasource::tests::MockNode;

    fn string_of(cell: &ValueCell<MockNode>) -> Option<String> {
        match &*cell.borrow() {
            VariableValue::Ready(value) => Some(value.to_string_value()),
            _ => None,
        }
    }

    #[test]
    fn test_child_scope_sees_parent_bindings() {
        let outer_decl = VariableDecl::<MockNode>::variable("outer");
        let inner_decl = VariableDecl::<MockNode>::variable("inner");

        let parent = Scope::root();
        parent
            .borrow_mut()
            .set(&outer_decl, VariableValue::Ready(Value::Number(1.0)));
        let child = Scope::child(&parent);
        child
            .borrow_mut()
            .set(&inner_decl, VariableValue::Ready(Value::Number(2.0)));

        assert_eq!(string_of(&lookup(&child, outer_decl.id()).unwrap()).as_deref(), Some("1"));
        assert!(lookup(&parent, inner_decl.id()).is_none());
    }

    #[test]
    fn test_set_replaces_existing_cell() {
        let decl = VariableDecl::<MockNode>::variable("x");
        let scope = Scope::root();
        scope.borrow_mut().set(&decl, VariableValue::BeingCalculated);
        let sentinel = lookup(&scope, decl.id()).unwrap();
        scope
            .borrow_mut()
            .set(&decl, VariableValue::Ready(Value::String("done".into())));

        assert!(matches!(&*sentinel.borrow(), VariableValue::BeingCalculated));
        assert_eq!(string_of(&lookup(&scope, decl.id()).unwrap()).as_deref(), Some("done"));
        assert_eq!(scope.borrow().len(), 1);
    }

    #[test]
    fn test_shared_cell_is_one_value() {
        let decl = VariableDecl::<MockNode>::param("p");
        let stage = ParamStage::<MockNode>::push(None);
        stage
            .borrow_mut()
            .set(ExpandedName::new("p"), Value::Boolean(true));

        let scope = Scope::root();
        let cell = stage.borrow().get(&ExpandedName::new("p")).unwrap();
        scope.borrow_mut().share(&decl, Rc::clone(&cell));

        assert!(Rc::ptr_eq(&cell, &lookup(&scope, decl.id()).unwrap()));
        assert_eq!(Rc::strong_count(&cell), 3);
    }

    #[test]
    fn test_stages_stack() {
        let outer = ParamStage::<MockNode>::push(None);
        let inner = ParamStage::push(Some(Rc::clone(&outer)));
        assert!(Rc::ptr_eq(&ParamStage::pop(&inner).unwrap(), &outer));
        assert!(ParamStage::pop(&outer).is_none());
    }
}
