use thiserror::Error;

/// Errors that can occur while assembling or analysing a call graph.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("call-stack accounting requested but no function carries a cumulative time")]
    MissingCumulativeTime,

    #[error("invalid selector pattern '{pattern}': {source}")]
    InvalidSelector {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{name} must be a finite, non-negative percentage, got {value}")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result type for call graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
