//! The instruction set and the compiled program unit.
//!
//! An [`Instruction`] is an opcode plus one 32-bit argument. What the argument means
//! is decided by the opcode through [`Code::operand_kind`], and [`Instruction::operand`]
//! decodes it into a typed [`Operand`]: an index into one of the program's side
//! tables, a signed jump delta, a flag, or a packed pair.

use crate::ast::{NumberDecl, SortSpec, VariableDecl};
use crate::error::{Location, XsltError};
use crate::evaluator::{ExprRef, PatternRef};
use std::fmt;
use std::rc::Rc;
use xslvm_datasource::{ExpandedName, NamespaceScope, QualifiedName, TreeNode};

/// Argument value of `StartElement`/`EndElement` meaning "the name held by the frame".
pub const CURRENT_NAME: u32 = u32::MAX;
/// Argument value of `ApplyTemplates` meaning "the default mode".
pub const DEFAULT_MODE: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramKind {
    Template,
    ApplyTemplates,
    ForEach,
    TopLevelVariable,
    Key,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    // Evaluation.
    EvaluateToString,
    EvaluateToBoolean,
    EvaluateToNumber,
    EvaluateToNodeSetIterator,
    EvaluateToNodeSetSnapshot,
    EvaluateToVariableValue,
    SelectChildren,

    // Output construction.
    AppendString,
    SetName,
    SetQName,
    SetUri,
    ResolveName,
    StartElement,
    SuggestNamespace,
    AddAttribute,
    AddText,
    AddComment,
    AddProcessingInstruction,
    EndElement,
    AddCopyAndJumpIfNoEndElement,
    AddCopyOfEvaluate,

    // Control flow.
    Jump,
    JumpIfTrue,
    JumpIfFalse,
    CallProgramOnNode,
    CallProgramOnNodeNoScope,
    CallProgramOnNodeChildScope,
    ApplyImportsOnNode,
    CallProgramOnNodes,
    CallProgramOnNodesNoScope,
    CallTemplate,
    ApplyTemplates,
    ApplyBuiltInTemplate,
    Return,

    // Collection scopes.
    StartCollectText,
    EndCollectText,
    StartCollectFragment,
    EndCollectFragment,

    // Binding.
    SetVariableFromEvaluate,
    SetVariableFromCollected,
    SetVariableFromString,
    SetWithParamFromEvaluate,
    SetWithParamFromCollected,
    SetWithParamFromString,
    StartCollectParams,
    ResetParamsCollectedForCall,
    TestAndSetIfParamIsPreset,

    // Auxiliary algorithms.
    MatchPatterns,
    SearchPatterns,
    ProcessKey,
    CountPatternsAndAdd,
    AddFormattedNumber,
    SetSortOrder,
    SetSortLang,
    SetSortDataType,
    SetSortCaseOrder,
    Sort,
    SendMessage,
    Error,
}

/// How an opcode's argument is to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Expression,
    String,
    Name,
    Namespaces,
    Resolve,
    Program,
    Mode,
    TemplateName,
    Variable,
    Patterns,
    Number,
    Sort,
    SortClause,
    Delta,
    Flag,
}

impl Code {
    pub fn operand_kind(self) -> OperandKind {
        use Code::*;
        match self {
            EvaluateToString
            | EvaluateToBoolean
            | EvaluateToNumber
            | EvaluateToNodeSetIterator
            | EvaluateToNodeSetSnapshot
            | EvaluateToVariableValue
            | AddCopyOfEvaluate
            | ProcessKey => OperandKind::Expression,
            AppendString | Error => OperandKind::String,
            SetName | StartElement | EndElement => OperandKind::Name,
            SuggestNamespace => OperandKind::Namespaces,
            ResolveName => OperandKind::Resolve,
            CallProgramOnNode
            | CallProgramOnNodeNoScope
            | CallProgramOnNodeChildScope
            | ApplyImportsOnNode
            | CallProgramOnNodes
            | CallProgramOnNodesNoScope => OperandKind::Program,
            ApplyTemplates => OperandKind::Mode,
            CallTemplate => OperandKind::TemplateName,
            SetVariableFromEvaluate
            | SetVariableFromCollected
            | SetVariableFromString
            | SetWithParamFromEvaluate
            | SetWithParamFromCollected
            | SetWithParamFromString
            | TestAndSetIfParamIsPreset => OperandKind::Variable,
            MatchPatterns | SearchPatterns => OperandKind::Patterns,
            CountPatternsAndAdd | AddFormattedNumber => OperandKind::Number,
            Sort => OperandKind::Sort,
            SetSortOrder | SetSortLang | SetSortDataType | SetSortCaseOrder => {
                OperandKind::SortClause
            }
            SetQName | AddCopyAndJumpIfNoEndElement | Jump | JumpIfTrue | JumpIfFalse => {
                OperandKind::Delta
            }
            AddText | SendMessage => OperandKind::Flag,
            SelectChildren
            | SetUri
            | AddAttribute
            | AddComment
            | AddProcessingInstruction
            | ApplyBuiltInTemplate
            | Return
            | StartCollectText
            | EndCollectText
            | StartCollectFragment
            | EndCollectFragment
            | StartCollectParams
            | ResetParamsCollectedForCall => OperandKind::None,
        }
    }
}

/// A decoded instruction argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Expression(usize),
    String(usize),
    /// `None` is the frame's current name.
    Name(Option<usize>),
    Namespaces(usize),
    Resolve { namespaces: usize, use_default: bool },
    Program(usize),
    /// `None` is the default mode.
    Mode(Option<usize>),
    TemplateName(usize),
    Variable(usize),
    Patterns { start: usize, count: usize },
    Number(usize),
    Sort(usize),
    SortClause { sort: usize, clause: usize },
    Delta(i32),
    Flag(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub code: Code,
    pub argument: u32,
}

impl Instruction {
    pub fn new(code: Code, argument: u32) -> Self {
        Self { code, argument }
    }

    pub fn operand(&self) -> Operand {
        let arg = self.argument;
        let index = arg as usize;
        match self.code.operand_kind() {
            OperandKind::None => Operand::None,
            OperandKind::Expression => Operand::Expression(index),
            OperandKind::String => Operand::String(index),
            OperandKind::Name => Operand::Name((arg != CURRENT_NAME).then_some(index)),
            OperandKind::Namespaces => Operand::Namespaces(index),
            OperandKind::Resolve => Operand::Resolve {
                namespaces: (arg >> 1) as usize,
                use_default: arg & 1 == 1,
            },
            OperandKind::Program => Operand::Program(index),
            OperandKind::Mode => Operand::Mode((arg != DEFAULT_MODE).then_some(index)),
            OperandKind::TemplateName => Operand::TemplateName(index),
            OperandKind::Variable => Operand::Variable(index),
            OperandKind::Patterns => Operand::Patterns {
                start: (arg & 0xFFFF) as usize,
                count: (arg >> 16) as usize,
            },
            OperandKind::Number => Operand::Number(index),
            OperandKind::Sort => Operand::Sort(index),
            OperandKind::SortClause => Operand::SortClause {
                sort: (arg >> 16) as usize,
                clause: (arg & 0xFFFF) as usize,
            },
            OperandKind::Delta => Operand::Delta(arg as i32),
            OperandKind::Flag => Operand::Flag(arg != 0),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.code)?;
        match self.operand() {
            Operand::None => Ok(()),
            Operand::Delta(delta) => write!(f, "  {:+}", delta),
            Operand::Name(None) => f.write_str("  current"),
            Operand::Mode(None) => f.write_str("  default"),
            Operand::Flag(flag) => write!(f, "  {}", flag),
            Operand::Resolve {
                namespaces,
                use_default,
            } => write!(f, "  #{} default={}", namespaces, use_default),
            Operand::Patterns { start, count } => write!(f, "  #{}..{}", start, start + count),
            Operand::SortClause { sort, clause } => write!(f, "  #{}.{}", sort, clause),
            Operand::Expression(i)
            | Operand::String(i)
            | Operand::Name(Some(i))
            | Operand::Namespaces(i)
            | Operand::Program(i)
            | Operand::Mode(Some(i))
            | Operand::TemplateName(i)
            | Operand::Variable(i)
            | Operand::Number(i)
            | Operand::Sort(i) => write!(f, "  #{}", i),
        }
    }
}

/// A finished, immutable unit of compiled code.
#[derive(Debug)]
pub struct Program<N: TreeNode> {
    pub kind: ProgramKind,
    /// The mode of an apply-templates dispatch program.
    pub mode: Option<ExpandedName>,
    /// The key name of a key program, the variable name of a top-level variable program.
    pub name: Option<ExpandedName>,
    pub(crate) instructions: Box<[Instruction]>,
    pub(crate) locations: Box<[Option<Location>]>,
    pub(crate) strings: Box<[String]>,
    pub(crate) names: Box<[QualifiedName]>,
    pub(crate) expanded: Box<[ExpandedName]>,
    pub(crate) namespaces: Box<[Rc<NamespaceScope>]>,
    pub(crate) expressions: Box<[ExprRef<N>]>,
    pub(crate) patterns: Box<[PatternRef<N>]>,
    pub(crate) programs: Box<[Rc<Program<N>>]>,
    pub(crate) variables: Box<[Rc<VariableDecl<N>>]>,
    pub(crate) numbers: Box<[Rc<NumberDecl<N>>]>,
    pub(crate) sorts: Box<[Rc<SortSpec<N>>]>,
}

fn entry<'p, T>(table: &'p [T], index: usize, what: &str) -> Result<&'p T, XsltError> {
    table
        .get(index)
        .ok_or_else(|| XsltError::structural(format!("invalid {} index {}", what, index)))
}

impl<N: TreeNode> Program<N> {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instruction(&self, ip: usize) -> Option<Instruction> {
        self.instructions.get(ip).copied()
    }

    /// Source location of the construct instruction `ip` was compiled from.
    pub fn location(&self, ip: usize) -> Option<Location> {
        self.locations.get(ip).copied().flatten()
    }

    pub fn string(&self, index: usize) -> Result<&str, XsltError> {
        entry(&self.strings, index, "string").map(String::as_str)
    }

    pub fn name(&self, index: usize) -> Result<&QualifiedName, XsltError> {
        entry(&self.names, index, "name")
    }

    pub fn expanded_name(&self, index: usize) -> Result<&ExpandedName, XsltError> {
        entry(&self.expanded, index, "expanded name")
    }

    pub fn namespaces(&self, index: usize) -> Result<&Rc<NamespaceScope>, XsltError> {
        entry(&self.namespaces, index, "namespace scope")
    }

    pub fn expression(&self, index: usize) -> Result<&ExprRef<N>, XsltError> {
        entry(&self.expressions, index, "expression")
    }

    pub fn patterns(&self, start: usize, count: usize) -> Result<&[PatternRef<N>], XsltError> {
        self.patterns.get(start..start + count).ok_or_else(|| {
            XsltError::structural(format!("invalid pattern batch {}..{}", start, start + count))
        })
    }

    pub fn program(&self, index: usize) -> Result<&Rc<Program<N>>, XsltError> {
        entry(&self.programs, index, "program")
    }

    pub fn variable(&self, index: usize) -> Result<&Rc<VariableDecl<N>>, XsltError> {
        entry(&self.variables, index, "variable")
    }

    pub fn number(&self, index: usize) -> Result<&Rc<NumberDecl<N>>, XsltError> {
        entry(&self.numbers, index, "number")
    }

    pub fn sort(&self, index: usize) -> Result<&Rc<SortSpec<N>>, XsltError> {
        entry(&self.sorts, index, "sort")
    }

    pub fn nested_programs(&self) -> &[Rc<Program<N>>] {
        &self.programs
    }
}

impl<N: TreeNode> fmt::Display for Program<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} program", self.kind)?;
        if let Some(name) = &self.name {
            write!(f, " '{}'", name)?;
        }
        if let Some(mode) = &self.mode {
            write!(f, " mode '{}'", mode)?;
        }
        writeln!(f)?;
        for (ip, instruction) in self.instructions.iter().enumerate() {
            writeln!(f, "{:04}  {}", ip, instruction)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_decoding_follows_opcode() {
        let jump = Instruction::new(Code::JumpIfFalse, (-3i32) as u32);
        assert_eq!(jump.operand(), Operand::Delta(-3));

        let batch = Instruction::new(Code::MatchPatterns, (2 << 16) | 5);
        assert_eq!(batch.operand(), Operand::Patterns { start: 5, count: 2 });

        let clause = Instruction::new(Code::SetSortOrder, (1 << 16) | 3);
        assert_eq!(clause.operand(), Operand::SortClause { sort: 1, clause: 3 });

        let current = Instruction::new(Code::EndElement, CURRENT_NAME);
        assert_eq!(current.operand(), Operand::Name(None));

        let resolve = Instruction::new(Code::ResolveName, (4 << 1) | 1);
        assert_eq!(
            resolve.operand(),
            Operand::Resolve {
                namespaces: 4,
                use_default: true
            }
        );
    }

    #[test]
    fn test_instruction_display() {
        assert_eq!(Instruction::new(Code::Jump, 4).to_string(), "Jump  +4");
        assert_eq!(Instruction::new(Code::Return, 0).to_string(), "Return");
        assert_eq!(
            Instruction::new(Code::ApplyTemplates, DEFAULT_MODE).to_string(),
            "ApplyTemplates  default"
        );
    }
}
