use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::models::ApiCredentials;

pub(crate) mod error;

use error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubUserAuth {
    pub sub_user_id: i64,
    pub credentials: ApiCredentials,
}

/// An authenticated identity, and the sub-users whose ledgers are aggregated under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRecord {
    pub user_id: i64,
    pub credentials: ApiCredentials,
    #[serde(default)]
    pub sub_users: Vec<SubUserAuth>,
    #[serde(default)]
    pub is_sync_on_startup_required: bool,
    /// Lower bound for private collections, overriding the configured default.
    #[serde(default)]
    pub sync_start_mts: Option<i64>,
}

impl AuthRecord {
    pub fn new(user_id: i64, credentials: ApiCredentials) -> Self {
        Self {
            user_id,
            credentials,
            sub_users: Vec::new(),
            is_sync_on_startup_required: false,
            sync_start_mts: None,
        }
    }

    pub fn with_sub_user(mut self, sub_user_id: i64, credentials: ApiCredentials) -> Self {
        self.sub_users.push(SubUserAuth {
            sub_user_id,
            credentials,
        });
        self
    }

    pub fn with_sync_on_startup_required(mut self, required: bool) -> Self {
        self.is_sync_on_startup_required = required;
        self
    }

    pub fn with_sync_start_mts(mut self, start: i64) -> Self {
        self.sync_start_mts = Some(start);
        self
    }

    pub fn is_sub_account(&self) -> bool {
        !self.sub_users.is_empty()
    }

    /// Every `(sub_user_id, credentials)` pair work fans out to. A plain account yields itself
    /// with no sub-user; a sub-account yields each linked sub-user.
    pub fn fanout(&self) -> Vec<(Option<i64>, &ApiCredentials)> {
        if self.sub_users.is_empty() {
            return vec![(None, &self.credentials)];
        }

        self.sub_users
            .iter()
            .map(|sub| (Some(sub.sub_user_id), &sub.credentials))
            .collect()
    }
}

/// Source of the identities a pass synchronizes, keyed by an opaque identity key.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn resolve_active_identities(&self) -> Result<BTreeMap<String, AuthRecord>>;
}

/// [`AuthProvider`] over a fixed set of identities.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthProvider {
    identities: BTreeMap<String, AuthRecord>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, key: impl Into<String>, record: AuthRecord) -> Self {
        self.identities.insert(key.into(), record);
        self
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn resolve_active_identities(&self) -> Result<BTreeMap<String, AuthRecord>> {
        Ok(self.identities.clone())
    }
}
