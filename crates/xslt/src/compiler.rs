//! Single-pass compiler from the content tree to a [`Program`].
//!
//! Each construct appends its instructions and leaves control at the instruction after
//! its block. Forward jumps are emitted with a placeholder and back-patched once the
//! target is known. Bodies that run once per node or once per call are compiled into
//! nested programs with a reusable nested compiler.

use crate::ast::{Content, KeyDecl, NumberDecl, SortSpec, TemplateRule, VariableDecl};
use crate::error::{Location, XsltError};
use crate::evaluator::{ExprRef, PatternRef};
use crate::program::{Code, Instruction, Program, ProgramKind};
use std::collections::HashMap;
use std::mem;
use std::rc::Rc;
use xslvm_datasource::{ExpandedName, NamespaceScope, QualifiedName, TreeNode};

/// Largest index a table may hand out; `u32::MAX` is reserved as a marker.
const MAX_TABLE_INDEX: usize = (u32::MAX - 1) as usize;
/// Pattern batches pack start and count into 16 bits each.
const MAX_PATTERN_INDEX: usize = 0xFFFF;

pub struct Compiler<N: TreeNode> {
    kind: ProgramKind,
    mode: Option<ExpandedName>,
    name: Option<ExpandedName>,
    instructions: Vec<Instruction>,
    locations: Vec<Option<Location>>,
    location: Option<Location>,
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    names: Vec<QualifiedName>,
    name_index: HashMap<QualifiedName, u32>,
    expanded: Vec<ExpandedName>,
    expanded_index: HashMap<ExpandedName, u32>,
    namespaces: Vec<Rc<NamespaceScope>>,
    expressions: Vec<ExprRef<N>>,
    patterns: Vec<PatternRef<N>>,
    programs: Vec<Rc<Program<N>>>,
    variables: Vec<Rc<VariableDecl<N>>>,
    numbers: Vec<Rc<NumberDecl<N>>>,
    sorts: Vec<Rc<SortSpec<N>>>,
    nested: Option<Box<Compiler<N>>>,
}

fn table_index(len: usize, what: &str) -> Result<u32, XsltError> {
    if len > MAX_TABLE_INDEX {
        return Err(XsltError::compilation(format!("too many {} in one program", what)));
    }
    Ok(len as u32)
}

impl<N: TreeNode> Compiler<N> {
    pub fn new(kind: ProgramKind) -> Self {
        Self {
            kind,
            mode: None,
            name: None,
            instructions: Vec::new(),
            locations: Vec::new(),
            location: None,
            strings: Vec::new(),
            string_index: HashMap::new(),
            names: Vec::new(),
            name_index: HashMap::new(),
            expanded: Vec::new(),
            expanded_index: HashMap::new(),
            namespaces: Vec::new(),
            expressions: Vec::new(),
            patterns: Vec::new(),
            programs: Vec::new(),
            variables: Vec::new(),
            numbers: Vec::new(),
            sorts: Vec::new(),
            nested: None,
        }
    }

    /// Compiles a template body.
    pub fn compile_template(body: &[Content<N>]) -> Result<Program<N>, XsltError> {
        Self::compile_program(ProgramKind::Template, body)
    }

    pub fn compile_program(kind: ProgramKind, body: &[Content<N>]) -> Result<Program<N>, XsltError> {
        let mut compiler = Self::new(kind);
        compiler.compile_body(body)?;
        compiler.emit(Code::Return, 0);
        Ok(compiler.finish())
    }

    /// Builds the apply-templates dispatch for one mode: the rules are tried in the
    /// order given, each as one pattern batch, and the built-in rules run when none
    /// matches.
    pub fn compile_dispatch(
        rules: &[TemplateRule<N>],
        mode: Option<ExpandedName>,
    ) -> Result<Program<N>, XsltError> {
        let mut compiler = Self::new(ProgramKind::ApplyTemplates);
        compiler.mode = mode;
        for rule in rules {
            let batch = compiler.add_patterns(&rule.patterns)?;
            compiler.emit(Code::MatchPatterns, batch);
            let skip = compiler.emit_jump(Code::JumpIfFalse);
            let template = compiler.add_program(Rc::clone(&rule.template))?;
            compiler.emit(Code::CallProgramOnNode, template);
            compiler.emit(Code::Return, 0);
            compiler.patch_jump(skip)?;
        }
        compiler.emit(Code::ApplyBuiltInTemplate, 0);
        compiler.emit(Code::Return, 0);
        Ok(compiler.finish())
    }

    /// The program that fills a key's index for one tree. It runs with the tree's
    /// root as context node.
    pub fn compile_key(decl: &KeyDecl<N>) -> Result<Program<N>, XsltError> {
        let mut compiler = Self::new(ProgramKind::Key);
        compiler.name = Some(decl.name.clone());
        for definition in &decl.definitions {
            let batch = compiler.add_patterns(&definition.patterns)?;
            compiler.emit(Code::SearchPatterns, batch);
            let use_expr = compiler.add_expression(Rc::clone(&definition.use_expr))?;
            compiler.emit(Code::ProcessKey, use_expr);
        }
        compiler.emit(Code::Return, 0);
        Ok(compiler.finish())
    }

    /// The program that computes a top-level variable or parameter.
    pub fn compile_global_variable(decl: &Rc<VariableDecl<N>>) -> Result<Program<N>, XsltError> {
        let mut compiler = Self::new(ProgramKind::TopLevelVariable);
        compiler.name = Some(decl.name.clone());
        compiler.compile_variable(decl)?;
        compiler.emit(Code::Return, 0);
        Ok(compiler.finish())
    }

    pub(crate) fn compile_body(&mut self, body: &[Content<N>]) -> Result<(), XsltError> {
        body.iter()
            .try_for_each(|content| self.compile_content(content))
    }

    fn compile_content(&mut self, content: &Content<N>) -> Result<(), XsltError> {
        match content {
            Content::Text {
                text,
                disable_output_escaping,
            } => self.compile_text(text, *disable_output_escaping),
            Content::LiteralElement {
                name,
                namespaces,
                attributes,
                body,
            } => self.compile_literal_element(name, namespaces.as_ref(), attributes, body),
            Content::Element {
                name,
                namespace,
                scope,
                body,
            } => self.compile_element(name, namespace.as_ref(), scope, body),
            Content::Attribute {
                name,
                namespace,
                scope,
                body,
            } => self.compile_attribute(name, namespace.as_ref(), scope, body),
            Content::Comment(body) => self.compile_comment(body),
            Content::ProcessingInstruction { name, body } => {
                self.compile_processing_instruction(name, body)
            }
            Content::ValueOf {
                select,
                disable_output_escaping,
            } => self.compile_value_of(select, *disable_output_escaping),
            Content::CopyOf(select) => {
                let expr = self.add_expression(Rc::clone(select))?;
                self.emit(Code::AddCopyOfEvaluate, expr);
                Ok(())
            }
            Content::Copy(body) => self.compile_copy(body),
            Content::If { test, body } => self.compile_if(test, body),
            Content::Choose { whens, otherwise } => self.compile_choose(whens, otherwise.as_deref()),
            Content::ForEach { select, sort, body } => self.compile_for_each(select, sort.as_ref(), body),
            Content::ApplyTemplates {
                select,
                mode,
                sort,
                params,
            } => self.compile_apply_templates(select.as_ref(), mode.as_ref(), sort.as_ref(), params),
            Content::CallTemplate { name, params } => self.compile_call_template(name, params),
            Content::ApplyImports(dispatch) => {
                let program = self.add_program(Rc::clone(dispatch))?;
                self.emit(Code::ApplyImportsOnNode, program);
                Ok(())
            }
            Content::Variable(decl) => self.compile_variable(decl),
            Content::Number(decl) => self.compile_number(decl),
            Content::Message { body, terminate } => self.compile_message(body, *terminate),
            Content::Located { location, content } => {
                let outer = self.location.replace(*location);
                let result = self.compile_content(content);
                self.location = outer;
                result
            }
            Content::Invalid(message) => self.compile_error(message),
        }
    }

    pub(crate) fn emit(&mut self, code: Code, argument: u32) -> usize {
        self.instructions.push(Instruction::new(code, argument));
        self.locations.push(self.location);
        self.instructions.len() - 1
    }

    /// Emits a jump whose target is not known yet. Returns the index to patch.
    pub(crate) fn emit_jump(&mut self, code: Code) -> usize {
        self.emit(code, 0)
    }

    /// Points the jump at `at` to the next instruction to be emitted.
    pub(crate) fn patch_jump(&mut self, at: usize) -> Result<(), XsltError> {
        let delta = i32::try_from(self.instructions.len() - at)
            .map_err(|_| XsltError::compilation("jump distance too large"))?;
        if let Some(instruction) = self.instructions.get_mut(at) {
            instruction.argument = delta as u32;
        }
        Ok(())
    }

    pub(crate) fn add_string(&mut self, value: &str) -> Result<u32, XsltError> {
        if let Some(&index) = self.string_index.get(value) {
            return Ok(index);
        }
        let index = table_index(self.strings.len(), "strings")?;
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), index);
        Ok(index)
    }

    pub(crate) fn add_name(&mut self, name: &QualifiedName) -> Result<u32, XsltError> {
        if let Some(&index) = self.name_index.get(name) {
            return Ok(index);
        }
        let index = table_index(self.names.len(), "names")?;
        self.names.push(name.clone());
        self.name_index.insert(name.clone(), index);
        Ok(index)
    }

    pub(crate) fn add_expanded_name(&mut self, name: &ExpandedName) -> Result<u32, XsltError> {
        if let Some(&index) = self.expanded_index.get(name) {
            return Ok(index);
        }
        let index = table_index(self.expanded.len(), "names")?;
        self.expanded.push(name.clone());
        self.expanded_index.insert(name.clone(), index);
        Ok(index)
    }

    pub(crate) fn add_namespaces(&mut self, scope: &Rc<NamespaceScope>) -> Result<u32, XsltError> {
        if let Some(index) = self.namespaces.iter().position(|known| Rc::ptr_eq(known, scope)) {
            return Ok(index as u32);
        }
        let index = table_index(self.namespaces.len(), "namespace scopes")?;
        self.namespaces.push(Rc::clone(scope));
        Ok(index)
    }

    /// Every occurrence gets its own entry: handles are never shared between sites.
    pub(crate) fn add_expression(&mut self, expr: ExprRef<N>) -> Result<u32, XsltError> {
        let index = table_index(self.expressions.len(), "expressions")?;
        self.expressions.push(expr);
        Ok(index)
    }

    /// Registers a contiguous pattern batch and returns its packed `(start, count)`.
    pub(crate) fn add_patterns(&mut self, patterns: &[PatternRef<N>]) -> Result<u32, XsltError> {
        let start = self.patterns.len();
        if start > MAX_PATTERN_INDEX || patterns.len() > MAX_PATTERN_INDEX {
            return Err(XsltError::compilation("too many patterns in one program"));
        }
        self.patterns.extend(patterns.iter().cloned());
        Ok(((patterns.len() as u32) << 16) | start as u32)
    }

    pub(crate) fn add_program(&mut self, program: Rc<Program<N>>) -> Result<u32, XsltError> {
        let index = table_index(self.programs.len(), "nested programs")?;
        self.programs.push(program);
        Ok(index)
    }

    pub(crate) fn add_variable(&mut self, decl: &Rc<VariableDecl<N>>) -> Result<u32, XsltError> {
        if let Some(index) = self.variables.iter().position(|known| Rc::ptr_eq(known, decl)) {
            return Ok(index as u32);
        }
        let index = table_index(self.variables.len(), "variables")?;
        self.variables.push(Rc::clone(decl));
        Ok(index)
    }

    pub(crate) fn add_number(&mut self, decl: &Rc<NumberDecl<N>>) -> Result<u32, XsltError> {
        let index = table_index(self.numbers.len(), "number declarations")?;
        self.numbers.push(Rc::clone(decl));
        Ok(index)
    }

    pub(crate) fn add_sort(&mut self, sort: &Rc<SortSpec<N>>) -> Result<u32, XsltError> {
        if self.sorts.len() > MAX_PATTERN_INDEX {
            return Err(XsltError::compilation("too many sorts in one program"));
        }
        self.sorts.push(Rc::clone(sort));
        Ok(self.sorts.len() as u32 - 1)
    }

    /// Index the next sort registered with [`Compiler::add_sort`] will get.
    pub(crate) fn pending_sort_index(&self) -> u32 {
        self.sorts.len() as u32
    }

    /// Compiles `body` into a nested program of the given kind and returns its index.
    pub(crate) fn sub_program(
        &mut self,
        kind: ProgramKind,
        body: &[Content<N>],
    ) -> Result<u32, XsltError> {
        let mut nested = self
            .nested
            .take()
            .unwrap_or_else(|| Box::new(Compiler::new(kind)));
        nested.kind = kind;
        nested.location = self.location;
        // A failed nested compilation leaves partial buffers behind, so the compiler
        // is only kept for reuse on success.
        nested.compile_body(body)?;
        nested.emit(Code::Return, 0);
        let compiled = nested.finish();
        self.nested = Some(nested);
        self.add_program(Rc::new(compiled))
    }

    /// Copies the working buffers into a finished program and resets the compiler so
    /// it can be reused for a sibling program.
    pub(crate) fn finish(&mut self) -> Program<N> {
        self.string_index.clear();
        self.name_index.clear();
        self.expanded_index.clear();
        self.location = None;
        let program = Program {
            kind: self.kind,
            mode: self.mode.take(),
            name: self.name.take(),
            instructions: mem::take(&mut self.instructions).into_boxed_slice(),
            locations: mem::take(&mut self.locations).into_boxed_slice(),
            strings: mem::take(&mut self.strings).into_boxed_slice(),
            names: mem::take(&mut self.names).into_boxed_slice(),
            expanded: mem::take(&mut self.expanded).into_boxed_slice(),
            namespaces: mem::take(&mut self.namespaces).into_boxed_slice(),
            expressions: mem::take(&mut self.expressions).into_boxed_slice(),
            patterns: mem::take(&mut self.patterns).into_boxed_slice(),
            programs: mem::take(&mut self.programs).into_boxed_slice(),
            variables: mem::take(&mut self.variables).into_boxed_slice(),
            numbers: mem::take(&mut self.numbers).into_boxed_slice(),
            sorts: mem::take(&mut self.sorts).into_boxed_slice(),
        };
        log::debug!(
            "Compiled {:?} program with {} instructions",
            program.kind,
            program.len()
        );
        log::trace!("{}", program);
        program
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Avt, Content, NumberDecl, SortClause, SortSpec, VariableDecl, When};
    use crate::evaluator::CountLevel;
    use crate::program::{CURRENT_NAME, Operand};
    use crate::testing::{ScriptedExpression, ScriptedPattern};
    use xslvm_datasource::tests::MockNode;

    type Node = MockNode;

    fn codes(program: &Program<Node>) -> Vec<Code> {
        program.instructions().iter().map(|i| i.code).collect()
    }

    fn expr(source: &str) -> ExprRef<Node> {
        ScriptedExpression::constant_string(source, "").build()
    }

    #[test]
    fn test_literal_element_with_attribute_and_text() {
        let body = vec![Content::LiteralElement {
            name: QualifiedName::new("p"),
            namespaces: None,
            attributes: vec![crate::ast::LiteralAttribute {
                name: QualifiedName::new("class"),
                value: Avt::literal("intro"),
            }],
            body: vec![Content::text("hi")],
        }];
        let program = Compiler::compile_template(&body).unwrap();
        assert_eq!(
            codes(&program),
            vec![
                Code::StartElement,
                Code::AppendString,
                Code::SetName,
                Code::AddAttribute,
                Code::AppendString,
                Code::AddText,
                Code::EndElement,
                Code::Return,
            ]
        );
        assert_eq!(program.name(0).unwrap().local, "p");
    }

    #[test]
    fn test_if_jump_is_back_patched_past_body() {
        let body = vec![Content::If {
            test: expr("@flag"),
            body: vec![Content::text("a"), Content::text("b")],
        }];
        let program = Compiler::compile_template(&body).unwrap();
        let jump = program.instruction(1).unwrap();
        assert_eq!(jump.code, Code::JumpIfFalse);
        // Lands on the Return after the four body instructions.
        assert_eq!(jump.operand(), Operand::Delta(5));
        assert_eq!(program.instruction(6).unwrap().code, Code::Return);
    }

    #[test]
    fn test_choose_branches_all_reach_the_end() {
        let body = vec![Content::Choose {
            whens: vec![
                When {
                    test: expr("a"),
                    body: vec![Content::text("1")],
                },
                When {
                    test: expr("b"),
                    body: vec![Content::text("2")],
                },
            ],
            otherwise: Some(vec![Content::text("3")]),
        }];
        let program = Compiler::compile_template(&body).unwrap();
        let end = program.len() - 1;
        for (ip, instruction) in program.instructions().iter().enumerate() {
            if instruction.code == Code::Jump {
                let Operand::Delta(delta) = instruction.operand() else {
                    panic!("jump without delta");
                };
                assert_eq!(ip as i32 + delta, end as i32);
            }
        }
        assert_eq!(program.expressions.len(), 2);
    }

    #[test]
    fn test_strings_are_deduplicated_but_expressions_are_not() {
        let shared = expr("name()");
        let body = vec![
            Content::text("x"),
            Content::text("x"),
            Content::value_of(Rc::clone(&shared)),
            Content::value_of(shared),
        ];
        let program = Compiler::compile_template(&body).unwrap();
        assert_eq!(program.strings.len(), 1);
        assert_eq!(program.expressions.len(), 2);
    }

    #[test]
    fn test_for_each_body_is_a_nested_program() {
        let body = vec![Content::ForEach {
            select: expr("item"),
            sort: None,
            body: vec![Content::text("row")],
        }];
        let program = Compiler::compile_template(&body).unwrap();
        assert_eq!(
            codes(&program),
            vec![
                Code::EvaluateToNodeSetIterator,
                Code::CallProgramOnNodesNoScope,
                Code::Return
            ]
        );
        let nested = program.program(0).unwrap();
        assert_eq!(nested.kind, ProgramKind::ForEach);
        assert_eq!(codes(nested), vec![Code::AppendString, Code::AddText, Code::Return]);
    }

    #[test]
    fn test_sorted_for_each_uses_snapshot_and_dynamic_parameters() {
        let sort = Rc::new(SortSpec::new(vec![
            SortClause::new(expr("@k")).with_dynamic(
                crate::ast::SortParameter::Order,
                Avt::expression(expr("$order")),
            ),
        ]));
        let body = vec![Content::ForEach {
            select: expr("item"),
            sort: Some(sort),
            body: vec![Content::Variable(Rc::new(
                VariableDecl::variable("v").with_select(expr("."))
            ))],
        }];
        let program = Compiler::compile_template(&body).unwrap();
        assert_eq!(
            codes(&program),
            vec![
                Code::EvaluateToString,
                Code::SetSortOrder,
                Code::EvaluateToNodeSetSnapshot,
                Code::Sort,
                Code::CallProgramOnNodes,
                Code::Return,
            ]
        );
        assert_eq!(
            program.instruction(1).unwrap().operand(),
            Operand::SortClause { sort: 0, clause: 0 }
        );
    }

    #[test]
    fn test_invalid_content_compiles_to_error_in_place() {
        let body: Vec<Content<Node>> = vec![
            Content::text("before"),
            Content::Invalid("xsl:foo is not allowed here".into()).at((4, 2)),
            Content::text("after"),
        ];
        let program = Compiler::compile_template(&body).unwrap();
        assert_eq!(program.instruction(2).unwrap().code, Code::Error);
        assert_eq!(program.location(2), Some(Location { line: 4, col: 2 }));
        assert_eq!(program.location(3), None);
        assert_eq!(program.string(1).unwrap(), "xsl:foo is not allowed here");
    }

    #[test]
    fn test_element_name_errors_jump_to_signal() {
        let body = vec![Content::Element {
            name: Avt::expression(expr("$n")),
            namespace: None,
            scope: Rc::new(NamespaceScope::new()),
            body: Vec::new(),
        }];
        let program = Compiler::compile_template(&body).unwrap();
        let set_qname = program.instruction(1).unwrap();
        let Operand::Delta(delta) = set_qname.operand() else {
            panic!("SetQName carries a delta");
        };
        assert_eq!(
            program.instruction(1 + delta as usize).unwrap().code,
            Code::Error
        );
        assert!(program.instructions().iter().any(|i| i.code == Code::StartElement
            && i.argument == CURRENT_NAME));
    }

    #[test]
    fn test_dispatch_tries_rules_in_order_then_built_ins() {
        let rule = |name: &'static str| {
            TemplateRule::compile(
                vec![ScriptedPattern::named(name)],
                &[Content::text(name)],
            )
            .unwrap()
        };
        let program =
            Compiler::compile_dispatch(&[rule("para"), rule("div")], Some("toc".into())).unwrap();
        assert_eq!(program.mode, Some(ExpandedName::new("toc")));
        assert_eq!(
            codes(&program),
            vec![
                Code::MatchPatterns,
                Code::JumpIfFalse,
                Code::CallProgramOnNode,
                Code::Return,
                Code::MatchPatterns,
                Code::JumpIfFalse,
                Code::CallProgramOnNode,
                Code::Return,
                Code::ApplyBuiltInTemplate,
                Code::Return,
            ]
        );
        assert_eq!(
            program.instruction(4).unwrap().operand(),
            Operand::Patterns { start: 1, count: 1 }
        );
    }

    #[test]
    fn test_param_checks_preset_before_default_value() {
        let decl = Rc::new(VariableDecl::param("p").with_select(expr("1")));
        let program = Compiler::compile_template(&[Content::Variable(decl)]).unwrap();
        assert_eq!(
            codes(&program),
            vec![
                Code::TestAndSetIfParamIsPreset,
                Code::JumpIfTrue,
                Code::EvaluateToVariableValue,
                Code::SetVariableFromEvaluate,
                Code::Return,
            ]
        );
        assert_eq!(program.instruction(1).unwrap().operand(), Operand::Delta(3));
    }

    #[test]
    fn test_number_counts_then_formats() {
        let decl = Rc::new(
            NumberDecl::counting(CountLevel::Single).with_format(Avt::literal("(a)")),
        );
        let program = Compiler::compile_template(&[Content::Number(decl)]).unwrap();
        assert_eq!(
            codes(&program),
            vec![
                Code::CountPatternsAndAdd,
                Code::AppendString,
                Code::AddFormattedNumber,
                Code::Return
            ]
        );
    }

    #[test]
    fn test_nested_compiler_is_reused_for_siblings() {
        let body = vec![
            Content::ForEach {
                select: expr("a"),
                sort: None,
                body: vec![Content::text("1")],
            },
            Content::ForEach {
                select: expr("b"),
                sort: None,
                body: vec![Content::text("2")],
            },
        ];
        let program = Compiler::compile_template(&body).unwrap();
        assert_eq!(program.nested_programs().len(), 2);
        assert_eq!(program.program(1).unwrap().string(0).unwrap(), "2");
        assert_eq!(program.program(0).unwrap().string(0).unwrap(), "1");
    }
}
