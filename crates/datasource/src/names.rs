//! Qualified names, expanded names and in-scope namespace bindings.
//!
//! A [`QualifiedName`] is what the output side sees: the lexical prefix is kept so the
//! serializer can reproduce it. An [`ExpandedName`] is what identity comparisons use
//! (template modes, keys, parameters): only the namespace URI and the local part.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Namespace bound to the reserved `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    #[error("'{0}' is not a valid QName")]
    InvalidQName(String),

    #[error("undeclared namespace prefix '{0}'")]
    UndeclaredPrefix(String),
}

/// A name in the `{uri}local` form used for lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpandedName {
    pub uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            uri: None,
            local: local.into(),
        }
    }

    pub fn with_uri(uri: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            local: local.into(),
        }
    }
}

impl From<&str> for ExpandedName {
    fn from(local: &str) -> Self {
        Self::new(local)
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uri {
            Some(uri) => write!(f, "{{{}}}{}", uri, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// A complete name: namespace URI, lexical prefix and local part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    pub uri: Option<String>,
    pub prefix: Option<String>,
    pub local: String,
}

impl QualifiedName {
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            uri: None,
            prefix: None,
            local: local.into(),
        }
    }

    pub fn with_prefix(
        uri: impl Into<String>,
        prefix: impl Into<String>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            uri: Some(uri.into()),
            prefix: Some(prefix.into()),
            local: local.into(),
        }
    }

    /// Splits a lexical `prefix:local` name. The namespace URI is left unset; callers
    /// resolve it separately through a [`NamespaceScope`].
    pub fn parse(lexical: &str) -> Result<Self, NameError> {
        let invalid = || NameError::InvalidQName(lexical.to_string());
        match lexical.split_once(':') {
            Some((prefix, local)) => {
                if !is_ncname(prefix) || !is_ncname(local) {
                    return Err(invalid());
                }
                Ok(Self {
                    uri: None,
                    prefix: Some(prefix.to_string()),
                    local: local.to_string(),
                })
            }
            None if is_ncname(lexical) => Ok(Self::new(lexical)),
            None => Err(invalid()),
        }
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName {
            uri: self.uri.clone(),
            local: self.local.clone(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{}:{}", prefix, self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Checks the NCName production, restricted to the characters the engine needs to
/// tell apart: letters, digits, `_`, `-`, `.` and non-ASCII name characters.
pub fn is_ncname(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '\u{B7}'))
}

/// Namespace declarations in effect at some point of the stylesheet, chained to the
/// enclosing scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceScope {
    bindings: Vec<(Option<String>, String)>,
    parent: Option<Rc<NamespaceScope>>,
}

impl NamespaceScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child_of(parent: Rc<NamespaceScope>) -> Self {
        Self {
            bindings: Vec::new(),
            parent: Some(parent),
        }
    }

    /// Declares `prefix` (or the default namespace when `None`).
    pub fn declare(mut self, prefix: Option<&str>, uri: impl Into<String>) -> Self {
        self.bindings.push((prefix.map(str::to_string), uri.into()));
        self
    }

    /// Declarations made directly on this scope, innermost last.
    pub fn declarations(&self) -> impl Iterator<Item = (Option<&str>, &str)> {
        self.bindings
            .iter()
            .map(|(prefix, uri)| (prefix.as_deref(), uri.as_str()))
    }

    pub fn lookup(&self, prefix: Option<&str>) -> Option<&str> {
        if prefix == Some("xml") {
            return Some(XML_NAMESPACE);
        }
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some((_, uri)) = current
                .bindings
                .iter()
                .rev()
                .find(|(bound, _)| bound.as_deref() == prefix)
            {
                return Some(uri.as_str());
            }
            scope = current.parent.as_deref();
        }
        None
    }

    /// Fills in the URI of `name` from its prefix. An unprefixed name only picks up the
    /// default namespace when `use_default` is set (element names do, attribute names
    /// don't). An empty default namespace URI means "no namespace".
    pub fn resolve(&self, name: &mut QualifiedName, use_default: bool) -> Result<(), NameError> {
        match name.prefix.as_deref() {
            Some(prefix) => {
                let uri = self
                    .lookup(Some(prefix))
                    .ok_or_else(|| NameError::UndeclaredPrefix(prefix.to_string()))?;
                name.uri = Some(uri.to_string());
            }
            None if use_default => {
                name.uri = self
                    .lookup(None)
                    .filter(|uri| !uri.is_empty())
                    .map(str::to_string);
            }
            None => name.uri = None,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixed_and_plain_names() {
        let name = QualifiedName::parse("fo:block").unwrap();
        assert_eq!(name.prefix.as_deref(), Some("fo"));
        assert_eq!(name.local, "block");
        assert_eq!(QualifiedName::parse("para").unwrap().to_string(), "para");
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for bad in ["", "1abc", "a:b:c", ":x", "x:", "has space"] {
            assert!(QualifiedName::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_resolve_through_parent_scope() {
        let outer = Rc::new(NamespaceScope::new().declare(Some("h"), "urn:html"));
        let inner = NamespaceScope::child_of(outer).declare(None, "urn:default");

        let mut prefixed = QualifiedName::parse("h:p").unwrap();
        inner.resolve(&mut prefixed, true).unwrap();
        assert_eq!(prefixed.uri.as_deref(), Some("urn:html"));

        let mut element = QualifiedName::parse("p").unwrap();
        inner.resolve(&mut element, true).unwrap();
        assert_eq!(element.uri.as_deref(), Some("urn:default"));

        let mut attribute = QualifiedName::parse("p").unwrap();
        inner.resolve(&mut attribute, false).unwrap();
        assert_eq!(attribute.uri, None);
    }

    #[test]
    fn test_undeclared_prefix_is_an_error() {
        let mut name = QualifiedName::parse("x:p").unwrap();
        let err = NamespaceScope::new().resolve(&mut name, true).unwrap_err();
        assert_eq!(err, NameError::UndeclaredPrefix("x".into()));
    }

    #[test]
    fn test_expanded_name_display() {
        assert_eq!(ExpandedName::with_uri("urn:a", "k").to_string(), "{urn:a}k");
        assert_eq!(ExpandedName::new("k").to_string(), "k");
    }
}
