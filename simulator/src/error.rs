use thiserror::Error;

/// Errors surfaced by configuration loading, workload ingestion and the event loop.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid scheduling mode `{mode}` for pool {pool}")]
    UnknownSchedMode { pool: String, mode: String },

    #[error("missing setting `{field}` for pool {index}")]
    MissingPoolField { index: usize, field: &'static str },

    #[error("workload line {line}: {reason}")]
    Workload { line: u64, reason: String },

    #[error("workload line {line}: pool `{pool}` is not configured")]
    UnknownPool { line: u64, pool: String },

    #[error("snapshots do not match: {0}")]
    Mismatch(String),

    /// Scheduling state is corrupted, the run cannot continue.
    #[error("invariant violated @{time}: {message}")]
    Invariant { time: f64, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SimError {
    pub fn invariant(time: f64, message: impl Into<String>) -> Self {
        SimError::Invariant {
            time,
            message: message.into(),
        }
    }

    pub fn workload(line: u64, reason: impl Into<String>) -> Self {
        SimError::Workload {
            line,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
