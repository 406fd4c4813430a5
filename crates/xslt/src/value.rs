//! Values exchanged between the engine, the variable store and the evaluator.

use crate::nodelist::NodeList;
use crate::result_tree::ResultTree;
use std::fmt;
use std::rc::Rc;
use xslvm_datasource::TreeNode;

/// A fully computed value. Node sets and result trees are shared, not copied, when a
/// value is handed out to several readers.
#[derive(Debug, Clone)]
pub enum Value<N> {
    String(String),
    Number(f64),
    Boolean(bool),
    Fragment(Rc<ResultTree>),
    NodeSet(Rc<NodeList<N>>),
}

impl<N: TreeNode> Value<N> {
    pub fn nodes(nodes: impl IntoIterator<Item = N>) -> Self {
        Value::NodeSet(Rc::new(nodes.into_iter().collect()))
    }

    pub fn to_string_value(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Number(n) => format_number(*n),
            Value::Boolean(b) => b.to_string(),
            Value::Fragment(tree) => tree.string_value(),
            Value::NodeSet(nodes) => nodes
                .to_vec()
                .first()
                .map(TreeNode::string_value)
                .unwrap_or_default(),
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Boolean(b) => f64::from(u8::from(*b)),
            _ => parse_number(&self.to_string_value()),
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Fragment(_) => true,
            Value::NodeSet(nodes) => !nodes.is_empty(),
        }
    }
}

impl<N: TreeNode> fmt::Display for Value<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_value())
    }
}

/// Converts a number to its XPath string form: integers without a fractional part,
/// `NaN`, `Infinity`, `-Infinity`, and never an exponent.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == n.trunc() && n.abs() < 1e16 {
        // Covers -0 as well, which prints as "0".
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Parses the XPath `Number` production surrounded by optional whitespace. Anything
/// else, including exponents and `inf`, is NaN.
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c: char| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let mut seen_digit = false;
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot => seen_dot = true,
            _ => return f64::NAN,
        }
    }
    if !seen_digit {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use xslvm_datasource::tests::{MockNode, create_test_tree};

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 42 "), 42.0);
        assert_eq!(parse_number("-.5"), -0.5);
        assert!(parse_number("1e3").is_nan());
        assert!(parse_number("inf").is_nan());
        assert!(parse_number("").is_nan());
        assert!(parse_number(".").is_nan());
    }

    #[test]
    fn test_node_set_conversions_use_first_node() {
        let tree = create_test_tree();
        let value: Value<MockNode> = Value::nodes([tree.node(8), tree.node(1)]);
        assert_eq!(value.to_string_value(), "World");
        assert!(value.to_boolean());
        assert!(value.to_number().is_nan());

        let empty: Value<MockNode> = Value::nodes(std::iter::empty());
        assert!(!empty.to_boolean());
        assert_eq!(empty.to_string_value(), "");
    }
}
