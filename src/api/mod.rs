use async_trait::async_trait;

pub(crate) mod error;
pub(crate) mod models;
mod retry;

use error::Result;
use models::{FetchPage, FetchRequest};

pub use retry::RetryingRemoteApi;

/// Remote exchange API, as seen by the synchronization engine.
///
/// Implementations must report benign "no data" conditions as an empty [`FetchPage`] rather than
/// an error.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn fetch(&self, method: &str, request: &FetchRequest) -> Result<FetchPage>;
}
