//! Error types for tts-trainable.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid hyperparameter combination.
    #[error("config: {0}")]
    Config(String),

    /// A tensor does not have the shape its parameters declare.
    #[error("shape: {0}")]
    Shape(String),

    /// A loss term evaluated to NaN or infinity.
    #[error("non-finite {name}: {value}")]
    NonFinite { name: String, value: f32 },

    /// A trainable variable received no gradient from the objective.
    #[error("no gradient for trainable variable `{0}`")]
    MissingGradient(String),

    /// The timing harness was driven out of order.
    #[error("harness: {0}")]
    Harness(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(what: &str, expected: &[usize], actual: &[usize]) -> Self {
        Error::Shape(format!("{what}: expected {expected:?}, got {actual:?}"))
    }
}
