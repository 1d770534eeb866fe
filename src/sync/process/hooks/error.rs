use std::result;

use thiserror::Error;

use crate::{db::error::DbError, sync::error::Interrupted};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HookError {
    #[error("Hook `{hook}` requires at least one active identity")]
    NoIdentities { hook: &'static str },

    #[error("[Db] {0}")]
    Db(#[from] DbError),

    #[error("Hook `{hook}` found an invalid row in `{table}`: {reason}")]
    InvalidRow {
        hook: &'static str,
        table: String,
        reason: String,
    },

    #[error("Hook `{hook}` failed: {reason}")]
    Generic { hook: &'static str, reason: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

pub type Result<T> = result::Result<T, HookError>;
