//! `variable`, `param` and `with-param`.

use crate::ast::{VariableDecl, VariableKind};
use crate::compiler::Compiler;
use crate::error::XsltError;
use crate::program::Code;
use std::rc::Rc;
use xslvm_datasource::TreeNode;

/// Which family of binding instructions a declaration's value is stored with.
#[derive(Clone, Copy)]
struct Binding {
    from_evaluate: Code,
    from_collected: Code,
    from_string: Code,
}

const BIND_VARIABLE: Binding = Binding {
    from_evaluate: Code::SetVariableFromEvaluate,
    from_collected: Code::SetVariableFromCollected,
    from_string: Code::SetVariableFromString,
};

const BIND_WITH_PARAM: Binding = Binding {
    from_evaluate: Code::SetWithParamFromEvaluate,
    from_collected: Code::SetWithParamFromCollected,
    from_string: Code::SetWithParamFromString,
};

impl<N: TreeNode> Compiler<N> {
    pub(crate) fn compile_variable(&mut self, decl: &Rc<VariableDecl<N>>) -> Result<(), XsltError> {
        let variable = self.add_variable(decl)?;
        match decl.kind {
            VariableKind::Variable => self.compile_binding(decl, variable, BIND_VARIABLE),
            VariableKind::Param => {
                self.emit(Code::TestAndSetIfParamIsPreset, variable);
                let supplied = self.emit_jump(Code::JumpIfTrue);
                self.compile_binding(decl, variable, BIND_VARIABLE)?;
                self.patch_jump(supplied)
            }
            VariableKind::WithParam => self.compile_binding(decl, variable, BIND_WITH_PARAM),
        }
    }

    /// Opens a parameter stage and fills it. Nothing is emitted for a call without
    /// parameters, so the callee sees no stage at all.
    pub(crate) fn compile_with_params(
        &mut self,
        params: &[Rc<VariableDecl<N>>],
    ) -> Result<(), XsltError> {
        if params.is_empty() {
            return Ok(());
        }
        self.emit(Code::StartCollectParams, 0);
        for param in params {
            let variable = self.add_variable(param)?;
            self.compile_binding(param, variable, BIND_WITH_PARAM)?;
        }
        Ok(())
    }

    /// The value is `select` if present, else the body as a result tree fragment,
    /// else the empty string.
    fn compile_binding(
        &mut self,
        decl: &VariableDecl<N>,
        variable: u32,
        binding: Binding,
    ) -> Result<(), XsltError> {
        if let Some(select) = &decl.select {
            let index = self.add_expression(Rc::clone(select))?;
            self.emit(Code::EvaluateToVariableValue, index);
            self.emit(binding.from_evaluate, variable);
        } else if !decl.body.is_empty() {
            self.emit(Code::StartCollectFragment, 0);
            self.call_body(&decl.body)?;
            self.emit(Code::EndCollectFragment, 0);
            self.emit(binding.from_collected, variable);
        } else {
            self.emit(binding.from_string, variable);
        }
        Ok(())
    }
}
