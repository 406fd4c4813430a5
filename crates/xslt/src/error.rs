use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

impl From<(usize, usize)> for Location {
    fn from((line, col): (usize, usize)) -> Self {
        Location { line, col }
    }
}

/// What failed inside the evaluator: an expression or a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationTarget {
    Expression,
    Pattern,
}

impl EvaluationTarget {
    fn describe(self) -> &'static str {
        match self {
            EvaluationTarget::Expression => "evaluation of XPath expression failed",
            EvaluationTarget::Pattern => "matching XPath pattern failed",
        }
    }
}

/// Failure reported by an evaluator handle.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct EvaluationError {
    pub message: String,
}

impl EvaluationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure reported by an output handler.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("output error: {0}")]
pub struct OutputError(pub String);

fn additional_suffix(additional: &Option<String>) -> String {
    additional
        .as_ref()
        .map(|detail| format!("\nAdditional information: {detail}"))
        .unwrap_or_default()
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XsltError {
    #[error("{message}")]
    Structural {
        message: String,
        location: Option<Location>,
    },

    #[error("{}: {source_text}\nDetails: {details}{}", .target.describe(), additional_suffix(.additional))]
    Evaluation {
        target: EvaluationTarget,
        source_text: String,
        details: String,
        additional: Option<String>,
        location: Option<Location>,
    },

    #[error("max recursion depth exceeded ({depth})")]
    RecursionLimit { depth: usize },

    #[error("call to unknown named template '{0}'")]
    UnknownTemplate(String),

    #[error("transformation terminated by message: {0}")]
    Terminated(String),

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("compilation error: {0}")]
    Compilation(String),

    #[error("the transformation has already finished")]
    Finished,
}

impl XsltError {
    pub fn structural(msg: impl Into<String>) -> Self {
        Self::Structural {
            message: msg.into(),
            location: None,
        }
    }

    pub fn compilation(msg: impl Into<String>) -> Self {
        Self::Compilation(msg.into())
    }

    pub fn evaluation(
        target: EvaluationTarget,
        source_text: impl Into<String>,
        error: EvaluationError,
        additional: Option<String>,
    ) -> Self {
        Self::Evaluation {
            target,
            source_text: source_text.into(),
            details: error.message,
            additional,
            location: None,
        }
    }

    pub fn location(&self) -> Option<Location> {
        match self {
            Self::Structural { location, .. } | Self::Evaluation { location, .. } => *location,
            _ => None,
        }
    }

    /// Adds context to an evaluation error that has none yet. Other errors are unchanged.
    pub fn with_additional(mut self, detail: impl Into<String>) -> Self {
        if let Self::Evaluation { additional, .. } = &mut self {
            if additional.is_none() {
                *additional = Some(detail.into());
            }
        }
        self
    }

    /// Attaches `location` unless the error already carries a more precise one.
    pub fn at(mut self, at: Option<Location>) -> Self {
        if let Self::Structural { location, .. } | Self::Evaluation { location, .. } = &mut self {
            if location.is_none() {
                *location = at;
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_message_format() {
        let err = XsltError::evaluation(
            EvaluationTarget::Expression,
            "$a + 1",
            EvaluationError::new("bad variable"),
            Some("circular dependency between variables: a <= b <= a".into()),
        );
        assert_eq!(
            err.to_string(),
            "evaluation of XPath expression failed: $a + 1\nDetails: bad variable\n\
             Additional information: circular dependency between variables: a <= b <= a"
        );
    }

    #[test]
    fn test_pattern_message_without_additional_detail() {
        let err = XsltError::evaluation(
            EvaluationTarget::Pattern,
            "para[",
            EvaluationError::new("unexpected end"),
            None,
        );
        assert_eq!(
            err.to_string(),
            "matching XPath pattern failed: para[\nDetails: unexpected end"
        );
    }

    #[test]
    fn test_additional_detail_only_fills_evaluation_errors() {
        let err = XsltError::evaluation(
            EvaluationTarget::Expression,
            "$x",
            EvaluationError::new("failed"),
            None,
        )
        .with_additional("first")
        .with_additional("second");
        assert!(err.to_string().ends_with("Additional information: first"));

        let structural = XsltError::structural("boom").with_additional("ignored");
        assert_eq!(structural.to_string(), "boom");
    }

    #[test]
    fn test_location_is_attached_once() {
        let err = XsltError::structural("boom")
            .at(Some((3, 7).into()))
            .at(Some((9, 9).into()));
        assert_eq!(err.location(), Some(Location { line: 3, col: 7 }));
    }
}
