use std::result;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(sqlx::Error),

    #[error("Query error: {0}")]
    Query(sqlx::Error),

    #[error("Transaction begin error: {0}")]
    TransactionBegin(sqlx::Error),

    #[error("Transaction commit error: {0}")]
    TransactionCommit(sqlx::Error),

    #[error("Transaction rollback error: {0}")]
    TransactionRollback(sqlx::Error),

    #[error("Invalid SQL identifier `{0}`")]
    InvalidIdentifier(String),

    #[error("Table `{table}` has no columns to copy")]
    NoColumns { table: String },

    #[error("Unexpected row shape in `{table}`: {reason}")]
    UnexpectedRow { table: String, reason: String },

    #[error("Db generic error: {0}")]
    Generic(String),
}

pub type Result<T> = result::Result<T, DbError>;
