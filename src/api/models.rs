use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{db::models::Record, shared::Timeframe};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCredentials {
    api_key: String,
    api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// One page request. Pagination moves backward: `end` is the cursor, `start` the lower bound.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub credentials: Option<ApiCredentials>,
    pub start: i64,
    pub end: i64,
    pub limit: u64,
    pub symbol: Option<String>,
    pub timeframe: Option<Timeframe>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    /// Items as returned by the API, newest first.
    pub items: Vec<Record>,
    /// The `end` to request the next (older) page with, if the API offers one.
    pub next_cursor: Option<i64>,
}

impl FetchPage {
    pub fn new(items: Vec<Record>, next_cursor: Option<i64>) -> Self {
        Self { items, next_cursor }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}
