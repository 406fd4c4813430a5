use crate::config::TransformConfig;
use crate::error::TransformError;
use std::rc::Rc;
use xslvm_datasource::TreeNode;
use xslvm_xslt::evaluator::PatternEvaluator;
use xslvm_xslt::{Engine, MessageSink, OutputHandler, SliceOutcome, Stylesheet};

/// Where a [`Transformation::run`] call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    /// The evaluator is waiting on something external. Call `run` again once it is
    /// available.
    Blocked,
}

/// Drives an [`Engine`] slice by slice, the way a host scheduler would.
pub struct Transformation<N: TreeNode> {
    engine: Engine<N>,
    max_slices: Option<usize>,
    slices: usize,
}

impl<N: TreeNode> Transformation<N> {
    pub fn new(engine: Engine<N>, config: TransformConfig) -> Self {
        Self {
            engine: engine.with_config(config.engine),
            max_slices: config.max_slices,
            slices: 0,
        }
    }

    /// A transformation that applies templates to `root` in the default mode.
    pub fn for_stylesheet(
        root: N,
        stylesheet: Rc<dyn Stylesheet<N>>,
        patterns: Rc<dyn PatternEvaluator<N>>,
        output: impl OutputHandler + 'static,
        config: TransformConfig,
    ) -> Result<Self, TransformError> {
        let engine = Engine::for_stylesheet(root, stylesheet, patterns, output)?;
        Ok(Self::new(engine, config))
    }

    pub fn with_message_sink(mut self, sink: impl MessageSink + 'static) -> Self {
        self.engine = self.engine.with_message_sink(sink);
        self
    }

    /// Slices executed over the lifetime of this transformation.
    pub fn slices(&self) -> usize {
        self.slices
    }

    pub fn engine(&self) -> &Engine<N> {
        &self.engine
    }

    pub fn is_finished(&self) -> bool {
        self.engine.is_finished()
    }

    /// Runs slices until the transformation finishes or blocks.
    ///
    /// With `max_slices` configured, a run that needs more slices stops with
    /// [`TransformError::SliceLimit`]; the engine keeps its state and a later `run`
    /// continues where this one stopped.
    pub fn run(&mut self) -> Result<RunStatus, TransformError> {
        let mut this_run = 0;
        loop {
            if let Some(limit) = self.max_slices
                && this_run >= limit
            {
                log::warn!("Transformation still running after {} slices", this_run);
                return Err(TransformError::SliceLimit { slices: this_run });
            }
            let outcome = self.engine.run_slice()?;
            self.slices += 1;
            this_run += 1;
            match outcome {
                SliceOutcome::Yielded => continue,
                SliceOutcome::Blocked => {
                    log::debug!("Transformation blocked after {} slices", self.slices);
                    return Ok(RunStatus::Blocked);
                }
                SliceOutcome::Finished => {
                    log::debug!("Transformation finished after {} slices", self.slices);
                    return Ok(RunStatus::Finished);
                }
            }
        }
    }

    pub fn into_engine(self) -> Engine<N> {
        self.engine
    }
}
