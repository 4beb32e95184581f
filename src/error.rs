/// Startup failures. Any of these aborts the process before the listener binds.
#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed vocabulary {path}: {reason}")]
    MalformedVocabulary { path: String, reason: String },

    #[error("unsupported vocabulary format for {path}; expected a .json or .csv file")]
    UnsupportedVocabularyFormat { path: String },

    #[error("malformed model config {path}: {reason}")]
    MalformedModelConfig { path: String, reason: String },

    #[error("failed to load model weights from {path}: {reason}")]
    ModelWeights { path: String, reason: String },

    #[error("invalid sequence length {0}; the model needs at least one input")]
    InvalidSequenceLength(usize),

    #[error("failed to open prediction database {path}: {reason}")]
    Database { path: String, reason: String },

    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

/// Faults raised by the scoring backend.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("token sequence is empty")]
    EmptySequence,

    #[error("token id {id} is outside the embedding table of {vocab_size} rows")]
    TokenOutOfRange { id: u32, vocab_size: usize },

    #[error("model produced no output value")]
    EmptyOutput,

    #[error("model produced a non-finite confidence ({0})")]
    NonFinite(f32),

    #[error("tensor backend error: {0}")]
    Backend(#[from] candle_core::Error),
}

/// Terminal failure of one pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("bad input: {0}")]
    BadInput(String),

    #[error("inference failed: {0}")]
    Inference(#[from] ModelError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PredictError {
    pub fn status_code(&self) -> u16 {
        match self {
            PredictError::BadInput(_) => 400,
            PredictError::Inference(_) | PredictError::Internal(_) => 500,
        }
    }

    /// Value stored in the `log_type` column of the sink's log table.
    pub fn log_kind(&self) -> &'static str {
        match self {
            PredictError::BadInput(_) => "bad_input",
            PredictError::Inference(_) => "inference_error",
            PredictError::Internal(_) => "internal_error",
        }
    }
}

/// Persistence faults. These are logged and never fail a request.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,
}
