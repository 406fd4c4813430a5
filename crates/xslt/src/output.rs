//! Defines the `OutputHandler` trait, which decouples the execution engine from the
//! serializer that consumes the result tree.

use crate::error::OutputError;
use std::cell::RefCell;
use std::rc::Rc;
use xslvm_datasource::QualifiedName;

pub type OutputResult = Result<(), OutputError>;

/// The semantic actions of building the result tree, as a stream of events.
pub trait OutputHandler {
    fn start_element(&mut self, name: &QualifiedName) -> OutputResult;

    /// Hints that `prefix` should be bound to `uri` on the element just started.
    fn suggest_namespace(&mut self, prefix: Option<&str>, uri: &str) -> OutputResult;

    /// Sets an attribute on the currently open element.
    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> OutputResult;

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> OutputResult;

    fn add_comment(&mut self, text: &str) -> OutputResult;

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> OutputResult;

    fn end_element(&mut self, name: &QualifiedName) -> OutputResult;

    /// No more events will follow.
    fn end_output(&mut self) -> OutputResult {
        Ok(())
    }
}

/// A single recorded output action.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    StartElement(QualifiedName),
    Namespace {
        prefix: Option<String>,
        uri: String,
    },
    Attribute {
        name: QualifiedName,
        value: String,
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
    EndElement(QualifiedName),
    EndOutput,
}

impl OutputEvent {
    pub fn start(local: &str) -> Self {
        OutputEvent::StartElement(QualifiedName::new(local))
    }

    pub fn end(local: &str) -> Self {
        OutputEvent::EndElement(QualifiedName::new(local))
    }

    pub fn text(text: &str) -> Self {
        OutputEvent::Text {
            text: text.to_string(),
            disable_output_escaping: false,
        }
    }

    pub fn attribute(local: &str, value: &str) -> Self {
        OutputEvent::Attribute {
            name: QualifiedName::new(local),
            value: value.to_string(),
        }
    }
}

/// Records every event it receives. The reference sink for tests and for callers
/// that post-process the event stream themselves.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    pub events: Vec<OutputEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.events.last(), Some(OutputEvent::EndOutput))
    }

    /// Events with adjacent text runs merged, which is what a serializer would emit.
    pub fn normalized(&self) -> Vec<OutputEvent> {
        let mut merged: Vec<OutputEvent> = Vec::with_capacity(self.events.len());
        for event in &self.events {
            if let (
                Some(OutputEvent::Text {
                    text: previous,
                    disable_output_escaping: prev_doe,
                }),
                OutputEvent::Text {
                    text,
                    disable_output_escaping,
                },
            ) = (merged.last_mut(), event)
            {
                if prev_doe == disable_output_escaping {
                    previous.push_str(text);
                    continue;
                }
            }
            merged.push(event.clone());
        }
        merged
    }
}

impl OutputHandler for EventRecorder {
    fn start_element(&mut self, name: &QualifiedName) -> OutputResult {
        self.events.push(OutputEvent::StartElement(name.clone()));
        Ok(())
    }

    fn suggest_namespace(&mut self, prefix: Option<&str>, uri: &str) -> OutputResult {
        self.events.push(OutputEvent::Namespace {
            prefix: prefix.map(str::to_string),
            uri: uri.to_string(),
        });
        Ok(())
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> OutputResult {
        self.events.push(OutputEvent::Attribute {
            name: name.clone(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> OutputResult {
        self.events.push(OutputEvent::Text {
            text: text.to_string(),
            disable_output_escaping,
        });
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> OutputResult {
        self.events.push(OutputEvent::Comment(text.to_string()));
        Ok(())
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> OutputResult {
        self.events.push(OutputEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }

    fn end_element(&mut self, name: &QualifiedName) -> OutputResult {
        self.events.push(OutputEvent::EndElement(name.clone()));
        Ok(())
    }

    fn end_output(&mut self) -> OutputResult {
        self.events.push(OutputEvent::EndOutput);
        Ok(())
    }
}

/// Lets a caller keep a handle on a sink it gives to the engine.
impl<H: OutputHandler> OutputHandler for Rc<RefCell<H>> {
    fn start_element(&mut self, name: &QualifiedName) -> OutputResult {
        self.borrow_mut().start_element(name)
    }

    fn suggest_namespace(&mut self, prefix: Option<&str>, uri: &str) -> OutputResult {
        self.borrow_mut().suggest_namespace(prefix, uri)
    }

    fn add_attribute(&mut self, name: &QualifiedName, value: &str) -> OutputResult {
        self.borrow_mut().add_attribute(name, value)
    }

    fn add_text(&mut self, text: &str, disable_output_escaping: bool) -> OutputResult {
        self.borrow_mut().add_text(text, disable_output_escaping)
    }

    fn add_comment(&mut self, text: &str) -> OutputResult {
        self.borrow_mut().add_comment(text)
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) -> OutputResult {
        self.borrow_mut().add_processing_instruction(target, data)
    }

    fn end_element(&mut self, name: &QualifiedName) -> OutputResult {
        self.borrow_mut().end_element(name)
    }

    fn end_output(&mut self) -> OutputResult {
        self.borrow_mut().end_output()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_merges_adjacent_text() {
        let mut recorder = EventRecorder::new();
        recorder.start_element(&QualifiedName::new("p")).unwrap();
        recorder.add_text("a", false).unwrap();
        recorder.add_text("b", false).unwrap();
        recorder.add_text("<", true).unwrap();
        recorder.end_element(&QualifiedName::new("p")).unwrap();

        assert_eq!(
            recorder.normalized(),
            vec![
                OutputEvent::start("p"),
                OutputEvent::text("ab"),
                OutputEvent::Text {
                    text: "<".into(),
                    disable_output_escaping: true
                },
                OutputEvent::end("p"),
            ]
        );
    }

    #[test]
    fn test_shared_recorder_sees_events() {
        let shared = EventRecorder::shared();
        let mut sink: Box<dyn OutputHandler> = Box::new(Rc::clone(&shared));
        sink.add_comment("c").unwrap();
        sink.end_output().unwrap();
        assert!(shared.borrow().is_finished());
        assert_eq!(shared.borrow().events[0], OutputEvent::Comment("c".into()));
    }
}
