use thiserror::Error;

/// Failures surfaced by the loaders and the analysis pipeline.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// An upstream query or blob fetch failed or returned malformed data.
    #[error("failed to fetch {source_key}: {message}")]
    DataFetch { source_key: String, message: String },
    /// A record violates a structural invariant.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
    /// No records fall inside the requested window.
    #[error("no records for {0}")]
    EmptyResult(String),
}

impl DashboardError {
    pub fn fetch(source_key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::DataFetch {
            source_key: source_key.into(),
            message: err.to_string(),
        }
    }

    /// Soft errors should render an empty state instead of failing the command.
    pub fn is_empty_result(&self) -> bool {
        matches!(self, Self::EmptyResult(_))
    }
}

pub type Result<T, E = DashboardError> = std::result::Result<T, E>;
