//! # xslvm
//!
//! A resumable XSLT 1.0 style transformation engine. The heavy lifting lives in the
//! workspace crates:
//!
//! - [`xslvm_datasource`]: the read-only tree boundary ([`TreeNode`]).
//! - [`xslvm_xslt`]: the content AST, compiler, instruction set and execution engine.
//!
//! This crate adds the part a host application needs to actually run a transformation:
//! a [`Transformation`] driver that schedules engine slices, a JSON-loadable
//! [`TransformConfig`] and a logger setup helper.

pub mod config;
pub mod error;
pub mod transformation;

pub use config::TransformConfig;
pub use error::TransformError;
pub use transformation::{RunStatus, Transformation};

pub use xslvm_datasource::{NodeType, TreeNode};
pub use xslvm_xslt::{
    CollectingSink, Compiler, Content, Engine, EngineConfig, EventRecorder, LogSink,
    OutputEvent, OutputHandler, Program, RuleBasedStylesheet, SliceOutcome, Stylesheet,
    TemplateRule, Value, VariableDecl, XsltError,
};

/// Installs `env_logger` as the `log` backend, honouring `RUST_LOG`. Calling it more
/// than once is harmless.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .try_init();
}
