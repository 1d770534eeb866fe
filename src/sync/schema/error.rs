use std::result;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchemaError {
    #[error("Collection `{0}` is registered more than once")]
    DuplicateCollection(String),

    #[error("Collection name `{0}` is not a valid table name")]
    InvalidName(String),

    #[error("Collection `{0}` has no api method")]
    MissingApiMethod(String),

    #[error("Append-only collection `{0}` has no date field")]
    MissingDateField(String),

    #[error("Collection `{collection}` needs a `{field}` field for its role")]
    MissingRoleField { collection: String, field: String },

    #[error("Collection `{0}` has a zero page size ceiling")]
    ZeroMaxLimit(String),

    #[error("Collection `{0}` has an empty unique key")]
    EmptyUniqueKey(String),

    #[error("Collection `{collection}` references undeclared field `{field}`")]
    UndeclaredField { collection: String, field: String },
}

pub type Result<T> = result::Result<T, SchemaError>;
