//! Where errors, warnings and `xsl:message` output go.

use crate::error::Location;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Message,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<Location>,
    /// Set on messages that ask for the transformation to stop.
    pub terminate: bool,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            location,
            terminate: false,
        }
    }

    pub fn message(message: impl Into<String>, location: Option<Location>, terminate: bool) -> Self {
        Self {
            severity: Severity::Message,
            message: message.into(),
            location,
            terminate,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(location) => write!(f, "{} (at {})", self.message, location),
            None => f.write_str(&self.message),
        }
    }
}

/// What the engine should do after an error has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Stop the transformation.
    Fatal,
    /// Treat the error as a warning: skip the failing instruction and go on.
    Continue,
}

pub trait MessageSink {
    /// Receives one diagnostic. The answer only matters for errors.
    fn report(&mut self, diagnostic: &Diagnostic) -> Disposition;
}

/// Forwards diagnostics to the `log` facade. Every error is fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn report(&mut self, diagnostic: &Diagnostic) -> Disposition {
        match diagnostic.severity {
            Severity::Error => {
                log::error!("{}", diagnostic);
                Disposition::Fatal
            }
            Severity::Warning => {
                log::warn!("{}", diagnostic);
                Disposition::Continue
            }
            Severity::Message => {
                log::info!("{}", diagnostic);
                Disposition::Continue
            }
        }
    }
}

/// Keeps every diagnostic. Errors are fatal unless built with [`CollectingSink::recovering`].
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    pub diagnostics: Vec<Diagnostic>,
    recover: bool,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recovering() -> Self {
        Self {
            recover: true,
            ..Self::default()
        }
    }

    pub fn shared(self) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(self))
    }

    pub fn messages(&self) -> Vec<&str> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Message)
            .map(|d| d.message.as_str())
            .collect()
    }

    pub fn errors(&self) -> Vec<&Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .collect()
    }
}

impl MessageSink for CollectingSink {
    fn report(&mut self, diagnostic: &Diagnostic) -> Disposition {
        self.diagnostics.push(diagnostic.clone());
        if diagnostic.severity == Severity::Error && !self.recover {
            Disposition::Fatal
        } else {
            Disposition::Continue
        }
    }
}

impl<S: MessageSink> MessageSink for Rc<RefCell<S>> {
    fn report(&mut self, diagnostic: &Diagnostic) -> Disposition {
        self.borrow_mut().report(diagnostic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_dispositions() {
        let mut strict = CollectingSink::new();
        assert_eq!(strict.report(&Diagnostic::error("bad", None)), Disposition::Fatal);
        assert_eq!(
            strict.report(&Diagnostic::message("hello", None, false)),
            Disposition::Continue
        );
        assert_eq!(strict.messages(), vec!["hello"]);

        let mut lenient = CollectingSink::recovering();
        assert_eq!(lenient.report(&Diagnostic::error("bad", None)), Disposition::Continue);
        assert_eq!(lenient.errors().len(), 1);
    }

    #[test]
    fn test_display_includes_location() {
        let diagnostic = Diagnostic::error("broken", Some((2, 5).into()));
        assert_eq!(diagnostic.to_string(), "broken (at line 2, column 5)");
    }
}
