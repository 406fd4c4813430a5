//! The boundary to template selection.
//!
//! The engine never decides which template rule applies to a node. For each node an
//! `apply-templates` loop visits it asks the [`Stylesheet`] for a program and calls
//! it; conflict resolution (import precedence, priorities) lives behind that call.
//! [`RuleBasedStylesheet`] is a resolver that tries rules in the order they were
//! added, which is enough for front ends that sort their rules themselves.

use crate::ast::{KeyDecl, TemplateRule, VariableDecl};
use crate::compiler::Compiler;
use crate::error::XsltError;
use crate::program::Program;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use xslvm_datasource::{ExpandedName, NodeType, TreeNode};

pub trait Stylesheet<N: TreeNode> {
    /// The program `apply-templates` runs for a node of type `hint` in `mode`. It must
    /// end in the built-in rules when no template matches.
    fn apply_templates_program(
        &self,
        mode: Option<&ExpandedName>,
        hint: NodeType,
    ) -> Result<Rc<Program<N>>, XsltError>;

    fn named_template(&self, name: &ExpandedName) -> Option<Rc<Program<N>>>;

    fn key(&self, name: &ExpandedName) -> Option<Rc<KeyDecl<N>>>;

    /// Top-level variables and parameters.
    fn global_variables(&self) -> Vec<Rc<VariableDecl<N>>>;

    /// The value supplied for a top-level parameter by whoever started the run.
    fn parameter(&self, name: &ExpandedName) -> Option<Value<N>>;
}

/// Rules per mode in caller order, plus everything else a run needs to look up by name.
pub struct RuleBasedStylesheet<N: TreeNode> {
    rules: HashMap<Option<ExpandedName>, Vec<TemplateRule<N>>>,
    named: HashMap<ExpandedName, Rc<Program<N>>>,
    keys: HashMap<ExpandedName, Rc<KeyDecl<N>>>,
    globals: Vec<Rc<VariableDecl<N>>>,
    parameters: HashMap<ExpandedName, Value<N>>,
    dispatch: RefCell<HashMap<Option<ExpandedName>, Rc<Program<N>>>>,
}

impl<N: TreeNode> RuleBasedStylesheet<N> {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
            named: HashMap::new(),
            keys: HashMap::new(),
            globals: Vec::new(),
            parameters: HashMap::new(),
            dispatch: RefCell::new(HashMap::new()),
        }
    }

    /// Adds a rule after the existing rules of `mode`. Earlier rules win.
    pub fn with_rule(mut self, mode: Option<ExpandedName>, rule: TemplateRule<N>) -> Self {
        self.rules.entry(mode).or_default().push(rule);
        self
    }

    pub fn with_named_template(mut self, name: impl Into<ExpandedName>, program: Program<N>) -> Self {
        self.named.insert(name.into(), Rc::new(program));
        self
    }

    pub fn with_key(mut self, key: KeyDecl<N>) -> Self {
        self.keys.insert(key.name.clone(), Rc::new(key));
        self
    }

    pub fn with_global(mut self, decl: Rc<VariableDecl<N>>) -> Self {
        self.globals.push(decl);
        self
    }

    pub fn with_parameter(mut self, name: impl Into<ExpandedName>, value: Value<N>) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn rules(&self, mode: Option<&ExpandedName>) -> &[TemplateRule<N>] {
        self.rules
            .get(&mode.cloned())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl<N: TreeNode> Default for RuleBasedStylesheet<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: TreeNode> Stylesheet<N> for RuleBasedStylesheet<N> {
    fn apply_templates_program(
        &self,
        mode: Option<&ExpandedName>,
        _hint: NodeType,
    ) -> Result<Rc<Program<N>>, XsltError> {
        let mode = mode.cloned();
        if let Some(program) = self.dispatch.borrow().get(&mode) {
            return Ok(Rc::clone(program));
        }
        let program = Rc::new(Compiler::compile_dispatch(
            self.rules(mode.as_ref()),
            mode.clone(),
        )?);
        log::debug!(
            "Compiled dispatch for mode {} ({} rules)",
            mode.as_ref().map_or_else(|| "#default".to_string(), ToString::to_string),
            self.rules(mode.as_ref()).len()
        );
        self.dispatch.borrow_mut().insert(mode, Rc::clone(&program));
        Ok(program)
    }

    fn named_template(&self, name: &ExpandedName) -> Option<Rc<Program<N>>> {
        self.named.get(name).cloned()
    }

    fn key(&self, name: &ExpandedName) -> Option<Rc<KeyDecl<N>>> {
        self.keys.get(name).cloned()
    }

    fn global_variables(&self) -> Vec<Rc<VariableDecl<N>>> {
        self.globals.clone()
    }

    fn parameter(&self, name: &ExpandedName) -> Option<Value<N>> {
        self.parameters.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Content;
    use crate::program::Code;
    use crate::testing::ScriptedPattern;
    use xslvm_datasource::tests::MockNode;

    #[test]
    fn test_dispatch_is_compiled_once_per_mode() {
        let rule = TemplateRule::compile(vec![ScriptedPattern::named("p")], &[Content::text("p")])
            .unwrap();
        let stylesheet: RuleBasedStylesheet<MockNode> =
            RuleBasedStylesheet::new().with_rule(None, rule);

        let first = stylesheet.apply_templates_program(None, NodeType::Element).unwrap();
        let again = stylesheet.apply_templates_program(None, NodeType::Text).unwrap();
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(first.instruction(0).unwrap().code, Code::MatchPatterns);

        let other = stylesheet
            .apply_templates_program(Some(&ExpandedName::new("toc")), NodeType::Element)
            .unwrap();
        assert_eq!(other.instruction(0).unwrap().code, Code::ApplyBuiltInTemplate);
        assert_eq!(other.mode, Some(ExpandedName::new("toc")));
    }
}
