//! One handler per instruction family. Every handler works on the frame at `depth`
//! and tells the run loop how to move on through a [`Flow`].

mod apply_templates;
mod call_template;
mod control_flow;
mod copy;
mod evaluate;
mod keys;
mod literals;
mod number;
mod sort;
mod variables;

use crate::engine::Engine;
use crate::error::XsltError;
use crate::program::{Code, Instruction, Operand};
use crate::resumable::Budget;
use xslvm_datasource::TreeNode;

/// What the run loop does with the instruction pointer after an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    Jump(i32),
    /// Execute the same instruction again: a callee was pushed, or a loop goes on.
    Stay,
    /// An evaluator operation is pending; the instruction is retried when resumed.
    Suspend,
}

pub(crate) fn execute<N: TreeNode>(
    engine: &mut Engine<N>,
    depth: usize,
    instruction: Instruction,
    budget: &mut Budget,
) -> Result<Flow, XsltError> {
    use Code::*;
    match (instruction.code, instruction.operand()) {
        (EvaluateToString, Operand::Expression(e)) => evaluate::handle_to_string(engine, depth, e, budget),
        (EvaluateToBoolean, Operand::Expression(e)) => evaluate::handle_to_boolean(engine, depth, e, budget),
        (EvaluateToNumber, Operand::Expression(e)) => evaluate::handle_to_number(engine, depth, e, budget),
        (EvaluateToVariableValue, Operand::Expression(e)) => {
            evaluate::handle_to_value(engine, depth, e, budget)
        }
        (EvaluateToNodeSetIterator, Operand::Expression(e)) => {
            evaluate::handle_to_iterator(engine, depth, e, budget)
        }
        (EvaluateToNodeSetSnapshot, Operand::Expression(e)) => {
            evaluate::handle_to_snapshot(engine, depth, e, budget)
        }
        (SelectChildren, _) => evaluate::handle_select_children(engine, depth),

        (AppendString, Operand::String(s)) => literals::handle_append_string(engine, depth, s),
        (SetName, Operand::Name(name)) => literals::handle_set_name(engine, depth, name),
        (SetQName, Operand::Delta(on_error)) => literals::handle_set_qname(engine, depth, on_error),
        (SetUri, _) => literals::handle_set_uri(engine, depth),
        (
            ResolveName,
            Operand::Resolve {
                namespaces,
                use_default,
            },
        ) => literals::handle_resolve_name(engine, depth, namespaces, use_default),
        (StartElement, Operand::Name(name)) => literals::handle_start_element(engine, depth, name),
        (SuggestNamespace, Operand::Namespaces(ns)) => {
            literals::handle_suggest_namespace(engine, depth, ns)
        }
        (AddAttribute, _) => literals::handle_add_attribute(engine, depth),
        (AddText, Operand::Flag(doe)) => literals::handle_add_text(engine, depth, doe),
        (AddComment, _) => literals::handle_add_comment(engine, depth),
        (AddProcessingInstruction, _) => literals::handle_add_processing_instruction(engine, depth),
        (EndElement, Operand::Name(name)) => literals::handle_end_element(engine, depth, name),
        (AddCopyAndJumpIfNoEndElement, Operand::Delta(delta)) => {
            copy::handle_copy(engine, depth, delta)
        }
        (AddCopyOfEvaluate, Operand::Expression(e)) => copy::handle_copy_of(engine, depth, e, budget),

        (Jump, Operand::Delta(delta)) => Ok(Flow::Jump(delta)),
        (JumpIfTrue, Operand::Delta(delta)) => control_flow::handle_jump_if(engine, depth, true, delta),
        (JumpIfFalse, Operand::Delta(delta)) => {
            control_flow::handle_jump_if(engine, depth, false, delta)
        }
        (CallProgramOnNode, Operand::Program(p)) => {
            call_template::handle_call_on_node(engine, depth, p, call_template::CalleeScope::Global)
        }
        (CallProgramOnNodeNoScope, Operand::Program(p)) => {
            call_template::handle_call_on_node(engine, depth, p, call_template::CalleeScope::Shared)
        }
        (CallProgramOnNodeChildScope, Operand::Program(p)) => {
            call_template::handle_call_on_node(engine, depth, p, call_template::CalleeScope::Child)
        }
        (ApplyImportsOnNode, Operand::Program(p)) => call_template::handle_apply_imports(engine, depth, p),
        (CallProgramOnNodes, Operand::Program(p)) => {
            apply_templates::handle_call_on_nodes(engine, depth, p, true, budget)
        }
        (CallProgramOnNodesNoScope, Operand::Program(p)) => {
            apply_templates::handle_call_on_nodes(engine, depth, p, false, budget)
        }
        (CallTemplate, Operand::TemplateName(t)) => call_template::handle_call_template(engine, depth, t),
        (ApplyTemplates, Operand::Mode(mode)) => {
            apply_templates::handle_apply_templates(engine, depth, mode, budget)
        }
        (ApplyBuiltInTemplate, _) => apply_templates::handle_built_in(engine, depth, budget),
        (Return, _) => {
            engine.pop_frame();
            Ok(Flow::Stay)
        }

        (StartCollectText, _) => variables::handle_start_collect_text(engine),
        (EndCollectText, _) => variables::handle_end_collect_text(engine, depth),
        (StartCollectFragment, _) => variables::handle_start_collect_fragment(engine),
        (EndCollectFragment, _) => variables::handle_end_collect_fragment(engine, depth),
        (SetVariableFromEvaluate | SetVariableFromCollected, Operand::Variable(v)) => {
            variables::handle_set_variable(engine, depth, v, variables::Source::Value)
        }
        (SetVariableFromString, Operand::Variable(v)) => {
            variables::handle_set_variable(engine, depth, v, variables::Source::String)
        }
        (SetWithParamFromEvaluate | SetWithParamFromCollected, Operand::Variable(v)) => {
            variables::handle_set_with_param(engine, depth, v, variables::Source::Value)
        }
        (SetWithParamFromString, Operand::Variable(v)) => {
            variables::handle_set_with_param(engine, depth, v, variables::Source::String)
        }
        (StartCollectParams, _) => variables::handle_start_collect_params(engine, depth),
        (ResetParamsCollectedForCall, _) => variables::handle_reset_params(engine, depth),
        (TestAndSetIfParamIsPreset, Operand::Variable(v)) => {
            variables::handle_test_param(engine, depth, v)
        }

        (MatchPatterns, Operand::Patterns { start, count }) => {
            number::handle_match_patterns(engine, depth, start, count, budget)
        }
        (SearchPatterns, Operand::Patterns { start, count }) => {
            keys::handle_search_patterns(engine, depth, start, count)
        }
        (ProcessKey, Operand::Expression(e)) => keys::handle_process_key(engine, depth, e, budget),
        (CountPatternsAndAdd, Operand::Number(n)) => number::handle_count(engine, depth, n, budget),
        (AddFormattedNumber, Operand::Number(n)) => number::handle_format(engine, depth, n),
        (
            SetSortOrder | SetSortLang | SetSortDataType | SetSortCaseOrder,
            Operand::SortClause { clause, .. },
        ) => sort::handle_set_sort_parameter(engine, depth, instruction.code, clause),
        (Sort, Operand::Sort(s)) => sort::handle_sort(engine, depth, s, budget),
        (SendMessage, Operand::Flag(terminate)) => {
            control_flow::handle_message(engine, depth, terminate)
        }
        (Error, Operand::String(s)) => control_flow::handle_error(engine, depth, s),

        (code, operand) => Err(XsltError::structural(format!(
            "malformed instruction {:?} with operand {:?}",
            code, operand
        ))),
    }
}
