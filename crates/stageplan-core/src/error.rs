use thiserror::Error;

/// Canonical result for core and the planner.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A computation that cannot seed a pipeline was registered as a source.
    #[error("Unsupported source: computation '{computation}' of kind {kind} cannot be read as a source set")]
    UnsupportedSource { computation: String, kind: String },

    /// A node reached the end of a pipeline but cannot be written as a sink.
    #[error("Unsupported sink: computation '{computation}' of kind {kind} cannot terminate a pipeline")]
    UnsupportedSink { computation: String, kind: String },

    #[error("Unknown computation: {0}")]
    UnknownComputation(String),

    #[error("Unknown tuple set: {0}")]
    UnknownTupleSet(String),

    #[error("Invalid computation graph: {0}")]
    Graph(String),

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
