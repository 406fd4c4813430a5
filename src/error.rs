use thiserror::Error;
use xslvm_xslt::XsltError;

/// Errors surfaced by the [`Transformation`](crate::Transformation) driver.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Transformation failed: {0}")]
    Engine(#[from] XsltError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Transformation did not finish within {slices} slices")]
    SliceLimit { slices: usize },
}
