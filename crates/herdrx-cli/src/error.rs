//! Boundary error: every failure becomes a status code and an `{error}` body.

use herdrx_core::{ErrorResponse, PipelineError};
use herdrx_store::StoreError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Store(StoreError),

    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Pipeline(e) => Self::Pipeline(e),
            other => Self::Store(other),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Pipeline(e) => e.status_code(),
            Self::Store(StoreError::InvalidClient(_)) => 400,
            Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.status_code() < 500
    }

    pub fn response(&self) -> ErrorResponse {
        match self {
            Self::Pipeline(e) => ErrorResponse::from(e),
            other => ErrorResponse {
                error: other.to_string(),
            },
        }
    }

    /// Log at warn for caller mistakes, error for everything else.
    pub fn log(&self) {
        let status = self.status_code();
        if self.is_user_error() {
            warn!(status, error = %self, "request rejected");
        } else {
            error!(status, error = %self, "request failed");
        }
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> u8 {
        match self.status_code() {
            422 => 3,
            400..=499 => 2,
            _ => 1,
        }
    }
}
