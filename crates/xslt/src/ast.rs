//! The compiled-content tree the compiler consumes.
//!
//! Markup parsing is not part of this crate: a front end builds these nodes with the
//! expressions and patterns already compiled by the evaluator. Declarations that the
//! engine needs to find again at run time (variables, keys, sorts, numbers) are held
//! behind `Rc` so a program's side tables can point at them.

use crate::compiler::Compiler;
use crate::error::{Location, XsltError};
use crate::evaluator::{CountLevel, ExprRef, PatternRef};
use crate::program::Program;
use std::cell::OnceCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use xslvm_datasource::{ExpandedName, NamespaceScope, QualifiedName, TreeNode};

pub type Body<N> = Vec<Content<N>>;

/// One piece of an attribute value template.
#[derive(Debug, Clone)]
pub enum AvtPart<N: TreeNode> {
    Literal(String),
    Expression(ExprRef<N>),
}

/// An attribute value template: literal text interleaved with `{expr}` parts.
#[derive(Debug, Clone)]
pub struct Avt<N: TreeNode>(pub Vec<AvtPart<N>>);

impl<N: TreeNode> Avt<N> {
    pub fn literal(text: impl Into<String>) -> Self {
        Avt(vec![AvtPart::Literal(text.into())])
    }

    pub fn expression(expr: ExprRef<N>) -> Self {
        Avt(vec![AvtPart::Expression(expr)])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct LiteralAttribute<N: TreeNode> {
    pub name: QualifiedName,
    pub value: Avt<N>,
}

#[derive(Debug, Clone)]
pub struct When<N: TreeNode> {
    pub test: ExprRef<N>,
    pub body: Body<N>,
}

#[derive(Debug, Clone)]
pub enum Content<N: TreeNode> {
    Text {
        text: String,
        disable_output_escaping: bool,
    },
    /// A literal result element. `namespaces` are the declarations written on it.
    LiteralElement {
        name: QualifiedName,
        namespaces: Option<Rc<NamespaceScope>>,
        attributes: Vec<LiteralAttribute<N>>,
        body: Body<N>,
    },
    Element {
        name: Avt<N>,
        namespace: Option<Avt<N>>,
        scope: Rc<NamespaceScope>,
        body: Body<N>,
    },
    Attribute {
        name: Avt<N>,
        namespace: Option<Avt<N>>,
        scope: Rc<NamespaceScope>,
        body: Body<N>,
    },
    Comment(Body<N>),
    ProcessingInstruction {
        name: Avt<N>,
        body: Body<N>,
    },
    ValueOf {
        select: ExprRef<N>,
        disable_output_escaping: bool,
    },
    CopyOf(ExprRef<N>),
    Copy(Body<N>),
    If {
        test: ExprRef<N>,
        body: Body<N>,
    },
    Choose {
        whens: Vec<When<N>>,
        otherwise: Option<Body<N>>,
    },
    ForEach {
        select: ExprRef<N>,
        sort: Option<Rc<SortSpec<N>>>,
        body: Body<N>,
    },
    /// With no `select`, the children of the context node are processed.
    ApplyTemplates {
        select: Option<ExprRef<N>>,
        mode: Option<ExpandedName>,
        sort: Option<Rc<SortSpec<N>>>,
        params: Vec<Rc<VariableDecl<N>>>,
    },
    CallTemplate {
        name: ExpandedName,
        params: Vec<Rc<VariableDecl<N>>>,
    },
    /// Runs the dispatch program the resolver built for the imported rules.
    ApplyImports(Rc<Program<N>>),
    Variable(Rc<VariableDecl<N>>),
    Number(Rc<NumberDecl<N>>),
    Message {
        body: Body<N>,
        terminate: bool,
    },
    Located {
        location: Location,
        content: Box<Content<N>>,
    },
    /// Content the front end rejected. Compiles to an error raised only if reached.
    Invalid(String),
}

impl<N: TreeNode> Content<N> {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text {
            text: text.into(),
            disable_output_escaping: false,
        }
    }

    pub fn element(name: &str, body: Body<N>) -> Self {
        Content::LiteralElement {
            name: QualifiedName::new(name),
            namespaces: None,
            attributes: Vec::new(),
            body,
        }
    }

    pub fn value_of(select: ExprRef<N>) -> Self {
        Content::ValueOf {
            select,
            disable_output_escaping: false,
        }
    }

    pub fn at(self, location: impl Into<Location>) -> Self {
        Content::Located {
            location: location.into(),
            content: Box::new(self),
        }
    }

    /// Whether running this content can bind a variable in the enclosing scope.
    pub(crate) fn declares_variables(&self) -> bool {
        match self {
            Content::Variable(_) => true,
            Content::Located { content, .. } => content.declares_variables(),
            Content::If { body, .. } => body.iter().any(Content::declares_variables),
            Content::Choose { whens, otherwise } => {
                whens
                    .iter()
                    .any(|when| when.body.iter().any(Content::declares_variables))
                    || otherwise
                        .iter()
                        .flatten()
                        .any(Content::declares_variables)
            }
            Content::LiteralElement { body, .. } | Content::Element { body, .. } => {
                body.iter().any(Content::declares_variables)
            }
            _ => false,
        }
    }
}

static NEXT_VARIABLE_ID: AtomicUsize = AtomicUsize::new(1);

/// Identity of a declaration, used as the variable store's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    Variable,
    Param,
    /// A value passed to a called template or to applied templates.
    WithParam,
}

#[derive(Debug)]
pub struct VariableDecl<N: TreeNode> {
    id: VariableId,
    pub name: ExpandedName,
    pub kind: VariableKind,
    /// Top-level declarations live in the global scope and are computed on demand.
    pub global: bool,
    pub select: Option<ExprRef<N>>,
    pub body: Body<N>,
    program: OnceCell<Rc<Program<N>>>,
}

impl<N: TreeNode> VariableDecl<N> {
    fn declare(name: impl Into<ExpandedName>, kind: VariableKind) -> Self {
        Self {
            id: VariableId(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            kind,
            global: false,
            select: None,
            body: Vec::new(),
            program: OnceCell::new(),
        }
    }

    pub fn variable(name: impl Into<ExpandedName>) -> Self {
        Self::declare(name, VariableKind::Variable)
    }

    pub fn param(name: impl Into<ExpandedName>) -> Self {
        Self::declare(name, VariableKind::Param)
    }

    pub fn with_param(name: impl Into<ExpandedName>) -> Self {
        Self::declare(name, VariableKind::WithParam)
    }

    pub fn with_select(mut self, select: ExprRef<N>) -> Self {
        self.select = Some(select);
        self
    }

    pub fn with_body(mut self, body: Body<N>) -> Self {
        self.body = body;
        self
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn id(&self) -> VariableId {
        self.id
    }

    /// The program that computes a top-level declaration's value, compiled on first use.
    pub fn program(self: &Rc<Self>) -> Result<Rc<Program<N>>, XsltError> {
        if let Some(program) = self.program.get() {
            return Ok(Rc::clone(program));
        }
        let program = Rc::new(Compiler::compile_global_variable(self)?);
        Ok(Rc::clone(self.program.get_or_init(|| program)))
    }
}

/// One `xsl:key` definition: nodes matching `patterns` are indexed by `use_expr`.
#[derive(Debug, Clone)]
pub struct KeyDefinition<N: TreeNode> {
    pub patterns: Vec<PatternRef<N>>,
    pub use_expr: ExprRef<N>,
}

/// All definitions sharing one key name.
#[derive(Debug)]
pub struct KeyDecl<N: TreeNode> {
    pub name: ExpandedName,
    pub definitions: Vec<KeyDefinition<N>>,
    program: OnceCell<Rc<Program<N>>>,
}

impl<N: TreeNode> KeyDecl<N> {
    pub fn new(name: impl Into<ExpandedName>) -> Self {
        Self {
            name: name.into(),
            definitions: Vec::new(),
            program: OnceCell::new(),
        }
    }

    pub fn with_definition(mut self, patterns: Vec<PatternRef<N>>, use_expr: ExprRef<N>) -> Self {
        self.definitions.push(KeyDefinition { patterns, use_expr });
        self
    }

    pub fn program(&self) -> Result<Rc<Program<N>>, XsltError> {
        if let Some(program) = self.program.get() {
            return Ok(Rc::clone(program));
        }
        let program = Rc::new(Compiler::compile_key(self)?);
        Ok(Rc::clone(self.program.get_or_init(|| program)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDataType {
    #[default]
    Text,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseOrder {
    #[default]
    UpperFirst,
    LowerFirst,
}

/// Sort parameters that may be given as attribute value templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortParameter {
    Order,
    Lang,
    DataType,
    CaseOrder,
}

#[derive(Debug, Clone)]
pub struct SortClause<N: TreeNode> {
    pub select: ExprRef<N>,
    pub order: SortOrder,
    pub data_type: SortDataType,
    pub case_order: CaseOrder,
    pub lang: Option<String>,
    /// Parameters computed at run time; they override the literal settings above.
    pub dynamic: Vec<(SortParameter, Avt<N>)>,
}

impl<N: TreeNode> SortClause<N> {
    pub fn new(select: ExprRef<N>) -> Self {
        Self {
            select,
            order: SortOrder::Ascending,
            data_type: SortDataType::Text,
            case_order: CaseOrder::UpperFirst,
            lang: None,
            dynamic: Vec::new(),
        }
    }

    pub fn descending(mut self) -> Self {
        self.order = SortOrder::Descending;
        self
    }

    pub fn numeric(mut self) -> Self {
        self.data_type = SortDataType::Number;
        self
    }

    pub fn lower_first(mut self) -> Self {
        self.case_order = CaseOrder::LowerFirst;
        self
    }

    pub fn with_dynamic(mut self, parameter: SortParameter, value: Avt<N>) -> Self {
        self.dynamic.push((parameter, value));
        self
    }
}

/// The ordered sort clauses of one `for-each` or `apply-templates`.
#[derive(Debug, Clone)]
pub struct SortSpec<N: TreeNode> {
    pub clauses: Vec<SortClause<N>>,
}

impl<N: TreeNode> SortSpec<N> {
    pub fn new(clauses: Vec<SortClause<N>>) -> Self {
        Self { clauses }
    }
}

#[derive(Debug, Clone)]
pub struct NumberDecl<N: TreeNode> {
    pub level: CountLevel,
    pub count: Vec<PatternRef<N>>,
    pub from: Vec<PatternRef<N>>,
    /// When present the number is this expression's value instead of a count.
    pub value: Option<ExprRef<N>>,
    pub format: Avt<N>,
    pub grouping: Option<(char, usize)>,
}

impl<N: TreeNode> NumberDecl<N> {
    pub fn counting(level: CountLevel) -> Self {
        Self {
            level,
            count: Vec::new(),
            from: Vec::new(),
            value: None,
            format: Avt::literal("1"),
            grouping: None,
        }
    }

    pub fn of_value(value: ExprRef<N>) -> Self {
        Self {
            value: Some(value),
            ..Self::counting(CountLevel::Single)
        }
    }

    pub fn with_format(mut self, format: Avt<N>) -> Self {
        self.format = format;
        self
    }

    pub fn with_count(mut self, count: Vec<PatternRef<N>>) -> Self {
        self.count = count;
        self
    }

    pub fn with_from(mut self, from: Vec<PatternRef<N>>) -> Self {
        self.from = from;
        self
    }

    pub fn with_grouping(mut self, separator: char, size: usize) -> Self {
        self.grouping = Some((separator, size));
        self
    }
}

/// A template rule as the resolver hands it over: its match patterns and compiled body.
#[derive(Debug, Clone)]
pub struct TemplateRule<N: TreeNode> {
    pub patterns: Vec<PatternRef<N>>,
    pub template: Rc<Program<N>>,
}

impl<N: TreeNode> TemplateRule<N> {
    pub fn compile(patterns: Vec<PatternRef<N>>, body: &[Content<N>]) -> Result<Self, XsltError> {
        Ok(Self {
            patterns,
            template: Rc::new(Compiler::compile_template(body)?),
        })
    }
}
