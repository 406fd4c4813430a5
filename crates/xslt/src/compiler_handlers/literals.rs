//! Output constructs: text, literal result elements, computed nodes, copies and numbers.

use crate::ast::{Avt, Content, LiteralAttribute, NumberDecl};
use crate::compiler::Compiler;
use crate::error::XsltError;
use crate::evaluator::ExprRef;
use crate::program::{CURRENT_NAME, Code, ProgramKind};
use std::rc::Rc;
use xslvm_datasource::{NamespaceScope, QualifiedName, TreeNode};

impl<N: TreeNode> Compiler<N> {
    pub(crate) fn compile_text(&mut self, text: &str, doe: bool) -> Result<(), XsltError> {
        if text.is_empty() {
            return Ok(());
        }
        let index = self.add_string(text)?;
        self.emit(Code::AppendString, index);
        self.emit(Code::AddText, u32::from(doe));
        Ok(())
    }

    pub(crate) fn compile_literal_element(
        &mut self,
        name: &QualifiedName,
        namespaces: Option<&Rc<NamespaceScope>>,
        attributes: &[LiteralAttribute<N>],
        body: &[Content<N>],
    ) -> Result<(), XsltError> {
        let name_index = self.add_name(name)?;
        self.emit(Code::StartElement, name_index);
        if let Some(namespaces) = namespaces {
            let index = self.add_namespaces(namespaces)?;
            self.emit(Code::SuggestNamespace, index);
        }
        for attribute in attributes {
            self.compile_avt(&attribute.value)?;
            let index = self.add_name(&attribute.name)?;
            self.emit(Code::SetName, index);
            self.emit(Code::AddAttribute, 0);
        }
        self.compile_body(body)?;
        self.emit(Code::EndElement, name_index);
        Ok(())
    }

    pub(crate) fn compile_element(
        &mut self,
        name: &Avt<N>,
        namespace: Option<&Avt<N>>,
        scope: &Rc<NamespaceScope>,
        body: &[Content<N>],
    ) -> Result<(), XsltError> {
        let invalid = self.compile_computed_name(name, namespace, Some((scope, true)))?;
        self.emit(Code::StartElement, CURRENT_NAME);
        self.compile_body(body)?;
        self.emit(Code::EndElement, CURRENT_NAME);
        self.compile_error_branch(invalid, "invalid element name")
    }

    pub(crate) fn compile_attribute(
        &mut self,
        name: &Avt<N>,
        namespace: Option<&Avt<N>>,
        scope: &Rc<NamespaceScope>,
        body: &[Content<N>],
    ) -> Result<(), XsltError> {
        let invalid = self.compile_computed_name(name, namespace, Some((scope, false)))?;
        self.collect_text(body)?;
        self.emit(Code::AddAttribute, 0);
        self.compile_error_branch(invalid, "invalid attribute name")
    }

    pub(crate) fn compile_comment(&mut self, body: &[Content<N>]) -> Result<(), XsltError> {
        self.collect_text(body)?;
        self.emit(Code::AddComment, 0);
        Ok(())
    }

    pub(crate) fn compile_processing_instruction(
        &mut self,
        name: &Avt<N>,
        body: &[Content<N>],
    ) -> Result<(), XsltError> {
        let invalid = self.compile_computed_name(name, None, None)?;
        self.collect_text(body)?;
        self.emit(Code::AddProcessingInstruction, 0);
        self.compile_error_branch(invalid, "invalid processing instruction name")
    }

    pub(crate) fn compile_value_of(
        &mut self,
        select: &ExprRef<N>,
        doe: bool,
    ) -> Result<(), XsltError> {
        let index = self.add_expression(Rc::clone(select))?;
        self.emit(Code::EvaluateToString, index);
        self.emit(Code::AddText, u32::from(doe));
        Ok(())
    }

    /// Shallow copy. The copy instruction jumps +2 for elements (body, then end
    /// element), +1 for the root (body only) and past everything for other nodes.
    pub(crate) fn compile_copy(&mut self, body: &[Content<N>]) -> Result<(), XsltError> {
        if body.is_empty() {
            self.emit(Code::AddCopyAndJumpIfNoEndElement, 3);
            self.emit(Code::Jump, 2);
            self.emit(Code::EndElement, CURRENT_NAME);
            return Ok(());
        }
        let code = Self::on_node_call(body);
        let program = self.sub_program(ProgramKind::Other, body)?;
        self.emit(Code::AddCopyAndJumpIfNoEndElement, 6);
        self.emit(Code::Jump, 4);
        self.emit(code, program);
        self.emit(Code::EndElement, CURRENT_NAME);
        self.emit(Code::Jump, 2);
        self.emit(code, program);
        Ok(())
    }

    pub(crate) fn compile_number(&mut self, decl: &Rc<NumberDecl<N>>) -> Result<(), XsltError> {
        let number = self.add_number(decl)?;
        match &decl.value {
            Some(value) => {
                let index = self.add_expression(Rc::clone(value))?;
                self.emit(Code::EvaluateToNumber, index);
            }
            None => {
                self.emit(Code::CountPatternsAndAdd, number);
            }
        }
        self.compile_avt(&decl.format)?;
        self.emit(Code::AddFormattedNumber, number);
        Ok(())
    }
}
