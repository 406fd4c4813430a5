//! Captured result trees (result tree fragments).
//!
//! A `ResultTree` is built by redirecting output into a [`ResultTreeBuilder`] while a
//! block of content runs, e.g. the body of a variable. It can be converted to a string
//! or replayed into any [`OutputHandler`] by `copy-of`.

use crate::output::{OutputHandler, OutputResult};
use xslvm_datasource::QualifiedName;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultNode {
    Element {
        name: QualifiedName,
        namespaces: Vec<(Option<String>, String)>,
        attributes: Vec<(QualifiedName, String)>,
        children: Vec<ResultNode>,
    },
    Text {
        text: String,
        disable_output_escaping: bool,
    },
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

/// An owned, immutable document fragment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTree {
    pub children: Vec<ResultNode>,
}

impl ResultTree {
    /// Concatenation of every descendant text node.
    pub fn string_value(&self) -> String {
        let mut value = String::new();
        let mut stack: Vec<&ResultNode> = self.children.iter().rev().collect();
        while let Some(node) = stack.pop() {
            match node {
                ResultNode::Text { text, .. } => value.push_str(text),
                ResultNode::Element { children, .. } => stack.extend(children.iter().rev()),
                ResultNode::Comment(_) | ResultNode::ProcessingInstruction { .. } => {}
            }
        }
        value
    }

    /// Emits the fragment's content into `output`, in document order.
    pub fn replay(&self, output: &mut dyn OutputHandler) -> OutputResult {
        enum Step<'t> {
            Enter(&'t ResultNode),
            Leave(&'t QualifiedName),
        }

        let mut stack: Vec<Step<'_>> = self.children.iter().rev().map(Step::Enter).collect();
        while let Some(step) = stack.pop() {
            match step {
                Step::Leave(name) => output.end_element(name)?,
                Step::Enter(ResultNode::Element {
                    name,
                    namespaces,
                    attributes,
                    children,
                }) => {
                    output.start_element(name)?;
                    for (prefix, uri) in namespaces {
                        output.suggest_namespace(prefix.as_deref(), uri)?;
                    }
                    for (attr, value) in attributes {
                        output.add_attribute(attr, value)?;
                    }
                    stack.push(Step::Leave(name));
                    stack.extend(children.iter().rev().map(Step::Enter));
                }
                Step::Enter(ResultNode::Text {
                    text,
                    disable_output_escaping,
                }) => output.add_text(text, *disable_output_escaping)?,
                Step::Enter(ResultNode::Comment(text)) => output.add_comment(text)?,
                Step::Enter(ResultNode::ProcessingInstruction { target, data }) => {
                    output.add_processing_instruction(target, data)?
                }
            }
        }
        Ok(())
    }
}

/// Output handler that assembles a [`ResultTree`].
#[derive(Debug, Default)]
pub struct ResultTreeBuilder {
    finished: Vec<ResultNode>,
    open: Vec<ResultNode>,
}

impl ResultTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn append(&mut self, node: ResultNode) {
        match self.open.last_mut() {
            Some(ResultNode::Element { children, .. }) => children.push(node),
            _ => self.finished.push(node),
        }
    }

    /// Closes anything still open and returns the fragment.
    pub fn finish(mut self) -> ResultTree {
        while let Some(node) = self.open.pop() {
            self.append(node);
        }
        ResultTree {
            children: self.finished,
        }
    }
}

impl OutputHandler for ResultTreeBuilder {
    fn start_element(&mut self, name: &QualifiedName) -> OutputResult {
        self.open.push(ResultNode::Element {
            name: name.clone(),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        });
        Ok(())
    }

    fn suggest_namespace(&mut self, prefix: Option<&str>, uri: &str) -> OutputResult {
        if let Some(ResultNode::Element { namespaces, .. }) = self.open.last_mut() {
            namespaces.push((prefix.map(str::to_string), uri.to_string()));
        }
        Ok(())
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> OutputResult {
        match self.open.last_mut() {
            Some(ResultNode::Element {
                attributes,
                children,
                ..
            }) if children.is_empty() => {
                match attributes.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, existing)) => *existing = value.to_string(),
                    None => attributes.push((name.clone(), value.to_string())),
                }
            }
            _ => log::warn!("attribute '{}' added outside of an open element start tag; ignored", name),
        }
        Ok(())
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> OutputResult {
        self.append(ResultNode::Text {
            text: text.to_string(),
            disable_output_escaping,
        });
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> OutputResult {
        self.append(ResultNode::Comment(text.to_string()));
        Ok(())
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> OutputResult {
        self.append(ResultNode::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn end_element(&mut self, _name: &QualifiedName) -> OutputResult {
        if let Some(node) = self.open.pop() {
            self.append(node);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{EventRecorder, OutputEvent};

    fn build_sample() -> ResultTree {
        let mut builder = ResultTreeBuilder::new();
        let item = QualifiedName::new("item");
        builder.add_text("lead ", false).unwrap();
        builder.start_element(&item).unwrap();
        builder.add_attribute(&QualifiedName::new("n"), "1").unwrap();
        builder.add_text("one", false).unwrap();
        builder.add_comment("skip me").unwrap();
        builder.end_element(&item).unwrap();
        builder.finish()
    }

    #[test]
    fn test_string_value_ignores_comments() {
        assert_eq!(build_sample().string_value(), "lead one");
    }

    #[test]
    fn test_replay_reproduces_events() {
        let mut recorder = EventRecorder::new();
        build_sample().replay(&mut recorder).unwrap();
        assert_eq!(
            recorder.events,
            vec![
                OutputEvent::text("lead "),
                OutputEvent::start("item"),
                OutputEvent::attribute("n", "1"),
                OutputEvent::text("one"),
                OutputEvent::Comment("skip me".into()),
                OutputEvent::end("item"),
            ]
        );
    }

    #[test]
    fn test_late_attribute_is_ignored() {
        let mut builder = ResultTreeBuilder::new();
        let p = QualifiedName::new("p");
        builder.start_element(&p).unwrap();
        builder.add_text("x", false).unwrap();
        builder.add_attribute(&QualifiedName::new("late"), "1").unwrap();
        builder.end_element(&p).unwrap();
        let tree = builder.finish();
        assert!(matches!(&tree.children[0], ResultNode::Element { attributes, .. } if attributes.is_empty()));
    }
}
