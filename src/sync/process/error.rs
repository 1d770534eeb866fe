use std::result;

use thiserror::Error;

use crate::{api::error::RemoteApiError, auth::error::AuthError, db::error::DbError};

use super::{
    super::{
        error::{Interrupted, SyncConfigError},
        queue::error::QueueError,
    },
    hooks::error::HookError,
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncPassError {
    #[error("[Config] {0}")]
    Config(#[from] SyncConfigError),

    #[error("[Db] {0}")]
    Db(#[from] DbError),

    #[error("[Auth] {0}")]
    Auth(#[from] AuthError),

    #[error("[RemoteApi] {0}")]
    RemoteApi(#[from] RemoteApiError),

    #[error("[Hook] {0}")]
    Hook(#[from] HookError),

    #[error("Invalid bookkeeping row `{step_key}`: {reason}")]
    InvalidBookkeeping { step_key: String, reason: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl SyncPassError {
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            Self::Interrupted(_) | Self::Hook(HookError::Interrupted(_))
        )
    }
}

pub(crate) type Result<T> = result::Result<T, SyncPassError>;

/// Failures of the background process outside of a pass.
#[derive(Error, Debug)]
pub(crate) enum SyncProcessError {
    #[error("Startup cleanup failed: {0}")]
    StartupCleanup(SyncPassError),

    #[error("[Queue] {0}")]
    Queue(#[from] QueueError),
}

pub(crate) type ProcessResult<T> = result::Result<T, SyncProcessError>;
