use std::result;

use thiserror::Error;
use tokio::{
    sync::{broadcast::error::SendError, mpsc},
    task::JoinError,
};

use super::{
    queue::error::QueueError,
    schema::{CollectionSelector, error::SchemaError},
};

/// Invalid setup, detected before any data is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SyncConfigError {
    #[error("Invalid collection selector `{0}`")]
    InvalidSelector(String),

    #[error("Invalid sync run id `{0}`")]
    InvalidRunId(String),

    #[error("Hook `{hook}` requires a `{collection}` collection, which is not registered")]
    HookMissingCollection {
        hook: &'static str,
        collection: String,
    },

    #[error("[InvalidSchema] {0}")]
    InvalidSchema(#[from] SchemaError),
}

pub(crate) type ConfigResult<T> = result::Result<T, SyncConfigError>;

/// Cooperative cancellation observed by a running pass.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Sync pass interrupted")]
pub struct Interrupted;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SyncError {
    #[error("[Config] {0}")]
    Config(#[from] SyncConfigError),

    #[error("[SyncProcessTaskJoin] {0}")]
    SyncProcessTaskJoin(JoinError),

    #[error("Sync already shutdown error")]
    SyncAlreadyShutdown,

    #[error("Failed to send sync shutdown signal error: {0}")]
    SendShutdownSignalFailed(SendError<()>),

    #[error("Failed to send sync trigger error: {0}")]
    SendTriggerFailed(mpsc::error::SendError<Vec<CollectionSelector>>),

    #[error("Sync shutdown timeout error")]
    ShutdownTimeout,

    #[error("[Queue] {0}")]
    Queue(#[from] QueueError),
}

pub type Result<T> = result::Result<T, SyncError>;
