//! Output redirection.
//!
//! While a collection scope is open every output instruction goes to the innermost
//! collector instead of the real sink. Collectors nest: closing one hands its content
//! back to the engine and output resumes into the collector (or sink) beneath it.

use crate::output::{OutputHandler, OutputResult};
use crate::result_tree::{ResultTree, ResultTreeBuilder};
use xslvm_datasource::QualifiedName;

/// Accumulates text only. Text inside elements started while collecting is dropped,
/// as are attributes, comments and processing instructions.
#[derive(Debug, Default)]
pub struct CollectText {
    text: String,
    ignore_depth: usize,
}

impl CollectText {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}

impl OutputHandler for CollectText {
    fn start_element(&mut self, _name: &QualifiedName) -> OutputResult {
        self.ignore_depth += 1;
        Ok(())
    }

    fn suggest_namespace(&mut self, _prefix: Option<&str>, _uri: &str) -> OutputResult {
        Ok(())
    }

    fn add_attribute(&mut self, _name: &QualifiedName, _value: &str) -> OutputResult {
        Ok(())
    }

    fn add_text(&mut self, text: &str, _disable_output_escaping: bool) -> OutputResult {
        if self.ignore_depth == 0 {
            self.text.push_str(text);
        }
        Ok(())
    }

    fn add_comment(&mut self, _text: &str) -> OutputResult {
        Ok(())
    }

    fn add_processing_instruction(&mut self, _target: &str, _data: &str) -> OutputResult {
        Ok(())
    }

    fn end_element(&mut self, _name: &QualifiedName) -> OutputResult {
        self.ignore_depth = self.ignore_depth.saturating_sub(1);
        Ok(())
    }
}

#[derive(Debug)]
enum Collector {
    Text(CollectText),
    Fragment(ResultTreeBuilder),
}

/// The sink plus the chain of collectors currently intercepting it.
pub(crate) struct OutputStack {
    sink: Box<dyn OutputHandler>,
    collectors: Vec<Collector>,
}

impl OutputStack {
    pub(crate) fn new(sink: Box<dyn OutputHandler>) -> Self {
        Self {
            sink,
            collectors: Vec::new(),
        }
    }

    /// The handler output instructions write to right now.
    pub(crate) fn current(&mut self) -> &mut dyn OutputHandler {
        match self.collectors.last_mut() {
            Some(Collector::Text(collector)) => collector,
            Some(Collector::Fragment(builder)) => builder,
            None => self.sink.as_mut(),
        }
    }

    pub(crate) fn sink(&mut self) -> &mut dyn OutputHandler {
        self.sink.as_mut()
    }

    pub(crate) fn depth(&self) -> usize {
        self.collectors.len()
    }

    pub(crate) fn start_text(&mut self) {
        self.collectors.push(Collector::Text(CollectText::new()));
    }

    pub(crate) fn start_fragment(&mut self) {
        self.collectors.push(Collector::Fragment(ResultTreeBuilder::new()));
    }

    /// Closes the innermost collector, which must be a text collector.
    pub(crate) fn end_text(&mut self) -> Option<String> {
        match self.collectors.pop()? {
            Collector::Text(collector) => Some(collector.into_text()),
            other => {
                self.collectors.push(other);
                None
            }
        }
    }

    /// Closes the innermost collector, which must be a fragment collector.
    pub(crate) fn end_fragment(&mut self) -> Option<ResultTree> {
        match self.collectors.pop()? {
            Collector::Fragment(builder) => Some(builder.finish()),
            other => {
                self.collectors.push(other);
                None
            }
        }
    }

    /// Drops collectors down to `depth`, for frames abandoned mid-collection.
    pub(crate) fn truncate(&mut self, depth: usize) {
        self.collectors.truncate(depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::{EventRecorder, OutputEvent};
    use std::rc::Rc;

    #[test]
    fn test_collect_text_skips_element_content() {
        let mut collector = CollectText::new();
        let b = QualifiedName::new("b");
        collector.add_text("keep ", false).unwrap();
        collector.start_element(&b).unwrap();
        collector.add_text("drop", false).unwrap();
        collector.end_element(&b).unwrap();
        collector.add_comment("drop").unwrap();
        collector.add_text("this", false).unwrap();
        assert_eq!(collector.into_text(), "keep this");
    }

    #[test]
    fn test_nested_collectors_restore_previous_target() {
        let recorder = EventRecorder::shared();
        let mut stack = OutputStack::new(Box::new(Rc::clone(&recorder)));

        stack.start_fragment();
        stack.current().add_text("outer", false).unwrap();
        stack.start_text();
        stack.current().add_text("inner", false).unwrap();
        assert_eq!(stack.end_fragment(), None, "mismatched close must not pop");
        assert_eq!(stack.end_text().as_deref(), Some("inner"));
        let fragment = stack.end_fragment().unwrap();
        assert_eq!(fragment.string_value(), "outer");

        stack.current().add_text("direct", false).unwrap();
        assert_eq!(recorder.borrow().events, vec![OutputEvent::text("direct")]);
        assert_eq!(stack.depth(), 0);
    }
}
