use std::{num::NonZeroU64, result};

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RemoteApiError {
    #[error("Unauthorized request to `{method}`")]
    Unauthorized { method: String },

    #[error("Rate limit reached on `{method}`")]
    RateLimited { method: String },

    #[error("Transport error on `{method}`: {reason}")]
    Transport { method: String, reason: String },

    #[error("Invalid response from `{method}`: {reason}")]
    InvalidResponse { method: String, reason: String },

    #[error("RemoteApiMaxTrialsReached error: error {error}, trials {trials}")]
    MaxTrialsReached {
        error: Box<RemoteApiError>,
        trials: NonZeroU64,
    },
}

impl RemoteApiError {
    /// Network and rate-limit failures, which may succeed if the same request is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transport { .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized { .. } => true,
            Self::MaxTrialsReached { error, .. } => error.is_unauthorized(),
            _ => false,
        }
    }
}

pub type Result<T> = result::Result<T, RemoteApiError>;
