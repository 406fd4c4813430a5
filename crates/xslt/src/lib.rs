//! # xslvm-xslt
//!
//! A compiler and resumable virtual machine for XSLT 1.0 style transformations.
//!
//! Template bodies arrive as a compiled content AST ([`ast::Content`]). The
//! [`compiler::Compiler`] turns each body into a flat [`program::Program`], and the
//! [`engine::Engine`] interprets programs over an explicit frame stack, one time slice
//! at a time:
//!
//! ```rust,ignore
//! use xslvm_xslt::{Engine, EventRecorder, RuleBasedStylesheet, SliceOutcome};
//!
//! let mut engine = Engine::for_stylesheet(root, Rc::new(stylesheet), patterns, EventRecorder::new())?;
//! while engine.run_slice()? == SliceOutcome::Yielded {
//!     // give the host a chance to do other work
//! }
//! ```
//!
//! Expressions and patterns are evaluated by an external evaluator behind the traits in
//! [`evaluator`]; every call into it may answer "pending", and the engine then suspends
//! with all progress kept in its frames. Which template a node gets is decided by a
//! [`stylesheet::Stylesheet`], and results go to an [`output::OutputHandler`].

pub mod ast;
pub mod collect;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod keys;
pub mod nodelist;
pub mod number;
pub mod output;
pub mod program;
pub mod result_tree;
pub mod resumable;
pub mod sort;
pub mod stylesheet;
pub mod value;
pub mod variables;

mod compiler_handlers;
mod executor_handlers;
mod frame;

#[cfg(any(test, feature = "testing"))]
pub mod testing;


pub use ast::{Content, KeyDecl, TemplateRule, VariableDecl};
pub use compiler::Compiler;
pub use config::EngineConfig;
pub use diagnostics::{CollectingSink, Diagnostic, Disposition, LogSink, MessageSink, Severity};
pub use engine::{Engine, SliceOutcome};
pub use error::{EvaluationError, Location, OutputError, XsltError};
pub use output::{EventRecorder, OutputEvent, OutputHandler};
pub use program::{Program, ProgramKind};
pub use stylesheet::{RuleBasedStylesheet, Stylesheet};
pub use value::Value;
