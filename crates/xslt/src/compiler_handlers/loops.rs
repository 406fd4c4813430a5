//! `for-each` and the node sources shared with `apply-templates`.

use crate::ast::{Content, SortParameter, SortSpec};
use crate::compiler::Compiler;
use crate::error::XsltError;
use crate::evaluator::ExprRef;
use crate::program::{Code, ProgramKind};
use std::rc::Rc;
use xslvm_datasource::TreeNode;

impl<N: TreeNode> Compiler<N> {
    pub(crate) fn compile_for_each(
        &mut self,
        select: &ExprRef<N>,
        sort: Option<&Rc<SortSpec<N>>>,
        body: &[Content<N>],
    ) -> Result<(), XsltError> {
        let code = if body.iter().any(Content::declares_variables) {
            Code::CallProgramOnNodes
        } else {
            Code::CallProgramOnNodesNoScope
        };
        let program = self.sub_program(ProgramKind::ForEach, body)?;
        self.compile_node_source(select, sort)?;
        self.emit(code, program);
        Ok(())
    }

    /// Evaluates `select` into the frame's node source. Unsorted selections are
    /// iterated lazily; sorted ones need a snapshot for random access.
    pub(crate) fn compile_node_source(
        &mut self,
        select: &ExprRef<N>,
        sort: Option<&Rc<SortSpec<N>>>,
    ) -> Result<(), XsltError> {
        self.compile_sort_parameters(sort)?;
        let index = self.add_expression(Rc::clone(select))?;
        match sort {
            Some(sort) => {
                self.emit(Code::EvaluateToNodeSetSnapshot, index);
                let sort = self.add_sort(sort)?;
                self.emit(Code::Sort, sort);
            }
            None => {
                self.emit(Code::EvaluateToNodeSetIterator, index);
            }
        }
        Ok(())
    }

    /// Computes the sort parameters written as attribute value templates. The sort
    /// table index is the one the following `Sort` instruction will use.
    pub(crate) fn compile_sort_parameters(
        &mut self,
        sort: Option<&Rc<SortSpec<N>>>,
    ) -> Result<(), XsltError> {
        let Some(sort) = sort else {
            return Ok(());
        };
        let sort_index = self.pending_sort_index();
        for (clause_index, clause) in sort.clauses.iter().enumerate() {
            if clause_index > 0xFFFF {
                return Err(XsltError::compilation("too many sort clauses"));
            }
            for (parameter, value) in &clause.dynamic {
                self.compile_avt(value)?;
                let code = match parameter {
                    SortParameter::Order => Code::SetSortOrder,
                    SortParameter::Lang => Code::SetSortLang,
                    SortParameter::DataType => Code::SetSortDataType,
                    SortParameter::CaseOrder => Code::SetSortCaseOrder,
                };
                self.emit(code, (sort_index << 16) | clause_index as u32);
            }
        }
        Ok(())
    }
}
