//! Conditionals, template invocation and messages.

use crate::ast::{Content, SortSpec, VariableDecl, When};
use crate::compiler::Compiler;
use crate::error::XsltError;
use crate::evaluator::ExprRef;
use crate::program::{Code, DEFAULT_MODE};
use std::rc::Rc;
use xslvm_datasource::{ExpandedName, TreeNode};

impl<N: TreeNode> Compiler<N> {
    pub(crate) fn compile_if(&mut self, test: &ExprRef<N>, body: &[Content<N>]) -> Result<(), XsltError> {
        let index = self.add_expression(Rc::clone(test))?;
        self.emit(Code::EvaluateToBoolean, index);
        let skip = self.emit_jump(Code::JumpIfFalse);
        self.compile_body(body)?;
        self.patch_jump(skip)
    }

    pub(crate) fn compile_choose(
        &mut self,
        whens: &[When<N>],
        otherwise: Option<&[Content<N>]>,
    ) -> Result<(), XsltError> {
        let mut exits = Vec::with_capacity(whens.len());
        for when in whens {
            let index = self.add_expression(Rc::clone(&when.test))?;
            self.emit(Code::EvaluateToBoolean, index);
            let next = self.emit_jump(Code::JumpIfFalse);
            self.compile_body(&when.body)?;
            exits.push(self.emit_jump(Code::Jump));
            self.patch_jump(next)?;
        }
        if let Some(otherwise) = otherwise {
            self.compile_body(otherwise)?;
        }
        exits.into_iter().try_for_each(|exit| self.patch_jump(exit))
    }

    pub(crate) fn compile_apply_templates(
        &mut self,
        select: Option<&ExprRef<N>>,
        mode: Option<&ExpandedName>,
        sort: Option<&Rc<SortSpec<N>>>,
        params: &[Rc<VariableDecl<N>>],
    ) -> Result<(), XsltError> {
        // Parameters are staged before the node source is set up: the source must be
        // the last thing the frame holds when the loop instruction runs.
        self.compile_with_params(params)?;
        match select {
            Some(select) => self.compile_node_source(select, sort)?,
            None => {
                self.compile_sort_parameters(sort)?;
                self.emit(Code::SelectChildren, 0);
                if let Some(sort) = sort {
                    let index = self.add_sort(sort)?;
                    self.emit(Code::Sort, index);
                }
            }
        }
        let mode = match mode {
            Some(mode) => self.add_expanded_name(mode)?,
            None => DEFAULT_MODE,
        };
        self.emit(Code::ApplyTemplates, mode);
        if !params.is_empty() {
            self.emit(Code::ResetParamsCollectedForCall, 0);
        }
        Ok(())
    }

    pub(crate) fn compile_call_template(
        &mut self,
        name: &ExpandedName,
        params: &[Rc<VariableDecl<N>>],
    ) -> Result<(), XsltError> {
        self.compile_with_params(params)?;
        let index = self.add_expanded_name(name)?;
        self.emit(Code::CallTemplate, index);
        if !params.is_empty() {
            self.emit(Code::ResetParamsCollectedForCall, 0);
        }
        Ok(())
    }

    pub(crate) fn compile_message(&mut self, body: &[Content<N>], terminate: bool) -> Result<(), XsltError> {
        self.collect_text(body)?;
        self.emit(Code::SendMessage, u32::from(terminate));
        Ok(())
    }
}
