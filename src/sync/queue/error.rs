use std::result;

use thiserror::Error;

use crate::db::error::DbError;

use super::super::error::SyncConfigError;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QueueError {
    #[error("[Config] {0}")]
    Config(#[from] SyncConfigError),

    #[error("[Db] {0}")]
    Db(#[from] DbError),

    #[error("Invalid sync queue job `{id}`: {reason}")]
    InvalidJob { id: String, reason: String },
}

pub(crate) type Result<T> = result::Result<T, QueueError>;
