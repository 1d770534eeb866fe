#![doc = include_str!("../README.md")]

mod api;
mod auth;
mod db;
mod shared;
/// Exports [`SyncEngine`], [`SyncController`], the collection registry, reconciliation hooks, and
/// other types related to exchange data synchronization.
///
/// [`SyncEngine`]: crate::sync::SyncEngine
/// [`SyncController`]: crate::sync::SyncController
pub mod sync;
#[cfg(test)]
mod test_util;
mod util;

pub use api::{RemoteApi, RetryingRemoteApi};
pub use auth::{AuthProvider, AuthRecord, StaticAuthProvider, SubUserAuth};
pub use db::{MemoryStorage, PgStorage, Storage, StorageTransaction};

/// Error types returned by `tradesync`.
pub mod error {
    pub use super::api::error::RemoteApiError;
    pub use super::auth::error::AuthError;
    pub use super::db::error::DbError;
    pub use super::shared::error::TimeframeParseError;
    pub use super::sync::{
        error::{Interrupted, SyncConfigError, SyncError},
        process::{error::SyncPassError, hooks::error::HookError},
        queue::error::QueueError,
        schema::error::SchemaError,
    };
    pub use super::sync::ProgressSinkError;

    /// Convenience general-purpose Result type alias.
    pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;
}

/// Exports storage rows and queries, remote API requests, and shared types.
pub mod models {
    pub use super::api::models::{ApiCredentials, FetchPage, FetchRequest};
    pub use super::db::models::{
        Condition, ElemQuery, Filter, FilterOp, ID_FIELD, Record, SortDirection, SortKey,
        record_f64, record_i64, record_str,
    };
    pub use super::shared::{Timeframe, pair_symbol};
}
