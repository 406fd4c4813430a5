pub(super) mod control_flow;
pub(super) mod literals;
pub(super) mod loops;
pub(super) mod variables;

use crate::ast::{Avt, AvtPart, Content};
use crate::compiler::Compiler;
use crate::error::XsltError;
use crate::program::{Code, ProgramKind};
use std::rc::Rc;
use xslvm_datasource::{NamespaceScope, TreeNode};

// Helpers shared by several construct handlers, implemented as methods on Compiler.

impl<N: TreeNode> Compiler<N> {
    /// Appends the value of `avt` to the frame's string buffer.
    pub(crate) fn compile_avt(&mut self, avt: &Avt<N>) -> Result<(), XsltError> {
        for part in &avt.0 {
            match part {
                AvtPart::Literal(text) if text.is_empty() => {}
                AvtPart::Literal(text) => {
                    let index = self.add_string(text)?;
                    self.emit(Code::AppendString, index);
                }
                AvtPart::Expression(expr) => {
                    let index = self.add_expression(Rc::clone(expr))?;
                    self.emit(Code::EvaluateToString, index);
                }
            }
        }
        Ok(())
    }

    /// Runs `body` in a callee frame on the current node. Bodies that bind variables
    /// get a child scope so their bindings end with the call.
    pub(crate) fn call_body(&mut self, body: &[Content<N>]) -> Result<(), XsltError> {
        if body.is_empty() {
            return Ok(());
        }
        let code = Self::on_node_call(body);
        let program = self.sub_program(ProgramKind::Other, body)?;
        self.emit(code, program);
        Ok(())
    }

    pub(crate) fn on_node_call(body: &[Content<N>]) -> Code {
        if body.iter().any(Content::declares_variables) {
            Code::CallProgramOnNodeChildScope
        } else {
            Code::CallProgramOnNodeNoScope
        }
    }

    /// Runs `body` with output captured as text into the string buffer.
    pub(crate) fn collect_text(&mut self, body: &[Content<N>]) -> Result<(), XsltError> {
        if body.is_empty() {
            return Ok(());
        }
        self.emit(Code::StartCollectText, 0);
        self.call_body(body)?;
        self.emit(Code::EndCollectText, 0);
        Ok(())
    }

    /// Turns the string buffer into the frame's name: parse it as a QName, then take
    /// the namespace from `namespace` if given, else from the in-scope declarations.
    /// Returns the jump to patch onto the error signal for an invalid name.
    pub(crate) fn compile_computed_name(
        &mut self,
        name: &Avt<N>,
        namespace: Option<&Avt<N>>,
        scope: Option<(&Rc<NamespaceScope>, bool)>,
    ) -> Result<usize, XsltError> {
        self.compile_avt(name)?;
        let invalid = self.emit_jump(Code::SetQName);
        match (namespace, scope) {
            (Some(namespace), _) => {
                self.compile_avt(namespace)?;
                self.emit(Code::SetUri, 0);
            }
            (None, Some((scope, use_default))) => {
                let index = self.add_namespaces(scope)?;
                self.emit(Code::ResolveName, (index << 1) | u32::from(use_default));
            }
            (None, None) => {}
        }
        Ok(invalid)
    }

    /// Closes a construct that has an error branch: skip over the signal on success,
    /// land on it when `invalid` fires.
    pub(crate) fn compile_error_branch(
        &mut self,
        invalid: usize,
        message: &str,
    ) -> Result<(), XsltError> {
        let done = self.emit_jump(Code::Jump);
        self.patch_jump(invalid)?;
        self.compile_error(message)?;
        self.patch_jump(done)
    }

    pub(crate) fn compile_error(&mut self, message: &str) -> Result<(), XsltError> {
        let index = self.add_string(message)?;
        self.emit(Code::Error, index);
        Ok(())
    }
}
