/*!
Errors raised by the forecasting pipeline
*/
use thiserror::Error;

/// A `Result` defaulting to the crate's [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by the forecasting pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid settings or too little data for the requested settings
    #[error("configuration error: {0}")]
    Configuration(String),
    /// An input tensor or window does not match the model's expected shape
    #[error("shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// The expected shape
        expected: String,
        /// The shape actually received
        actual: String,
    },
    /// Training produced a NaN or infinite loss
    #[error("non-finite {phase} loss {loss} at epoch {epoch}")]
    NonFiniteLoss {
        /// The (1-based) epoch at which the loss diverged
        epoch: usize,
        /// Either `"training"` or `"validation"`
        phase: &'static str,
        /// The offending loss value
        loss: f64,
    },
    /// Inference was requested from a model which has never been trained
    #[error("model is not trained yet")]
    NotReady,
    /// A window was normalized with different parameters than the ones used for the inverse transform
    #[error("normalizer mismatch: window built with {actual:016x}, inverse transform uses {expected:016x}")]
    NormalizerMismatch {
        /// Fingerprint of the normalizer passed for the inverse transform
        expected: u64,
        /// Fingerprint of the normalizer which produced the window
        actual: u64,
    },
    /// A checkpoint's weights file is not the one its sidecar was written with
    #[error("checkpoint {path} is inconsistent: sidecar expects weights {expected:016x}, found {actual:016x}")]
    CheckpointMismatch {
        /// The weights path
        path: String,
        /// Weights hash recorded in the sidecar
        expected: u64,
        /// Hash of the weights actually on disk
        actual: u64,
    },
    /// No configured city matches the given name or key
    #[error("unknown city: {0:?}")]
    UnknownCity(String),
    /// An external observation payload could not be interpreted
    #[error("malformed observation: {0}")]
    Observation(String),
    /// An error raised by libtorch
    #[error(transparent)]
    Torch(#[from] tch::TchError),
    /// An IO error
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A JSON (de)serialization error
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A CSV (de)serialization error
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Build a shape mismatch error from anything printable
    pub fn shape(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Error {
        Error::ShapeMismatch {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }
}
