use thiserror::Error;

/// Why a build did not succeed.
///
/// Cancellation is not an error; it is reported as
/// [`BuildOutcome::Stopped`](super::BuildOutcome::Stopped).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// A prerequisite is missing or invalid. No stage ran.
    #[error("Environment validation failed: {0}")]
    Environment(String),

    /// A stage's tool exited non-zero or an expected artifact is missing.
    #[error("Stage '{stage}' failed: {detail}")]
    Stage { stage: &'static str, detail: String },

    /// Another build is running on the same builder.
    #[error("Build already in progress")]
    AlreadyBuilding,
}

impl BuildError {
    /// Name of the failing stage, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
