use std::result;

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Identity backend error: {0}")]
    Backend(String),

    #[error("Invalid auth record for `{identity}`: {reason}")]
    InvalidRecord { identity: String, reason: String },
}

pub type Result<T> = result::Result<T, AuthError>;
