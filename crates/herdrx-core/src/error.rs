use thiserror::Error;

/// Error taxonomy shared by training and serving.
///
/// Coercion failures are deliberately absent: a non-numeric attribute
/// degrades to a missing value and the pipeline proceeds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("no trained model found for {client}")]
    ClientNotFound { client: String },

    #[error("diagnosis is required and must be a non-empty string or list of strings")]
    MissingDiagnosis,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("insufficient training data: {0}")]
    InsufficientData(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl PipelineError {
    /// Transport status code for this error kind.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ClientNotFound { .. } | Self::MissingDiagnosis | Self::MalformedRequest(_) => {
                400
            }
            Self::InsufficientData(_) => 422,
            Self::InvariantViolation(_) => 500,
        }
    }

    /// True when the error was caused by caller input rather than a bug.
    pub fn is_user_error(&self) -> bool {
        !matches!(self, Self::InvariantViolation(_))
    }

    pub fn client_not_found(client: impl Into<String>) -> Self {
        Self::ClientNotFound {
            client: client.into(),
        }
    }

    pub fn invariant(detail: impl Into<String>) -> Self {
        Self::InvariantViolation(detail.into())
    }
}
