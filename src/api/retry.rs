use std::{num::NonZeroU64, sync::Arc};

use async_trait::async_trait;
use tokio::time;
use tracing::warn;

use crate::sync::SyncConfig;

use super::{
    RemoteApi,
    error::{RemoteApiError, Result},
    models::{FetchPage, FetchRequest},
};

#[derive(Debug, Clone)]
pub(crate) struct RetryConfig {
    cooldown: time::Duration,
    error_cooldown: time::Duration,
    max_trials: NonZeroU64,
}

impl From<&SyncConfig> for RetryConfig {
    fn from(value: &SyncConfig) -> Self {
        Self {
            cooldown: value.rest_api_cooldown(),
            error_cooldown: value.rest_api_error_cooldown(),
            max_trials: value.rest_api_error_max_trials(),
        }
    }
}

/// Wraps a [`RemoteApi`], repeating requests that fail with transient errors.
///
/// Each request is attempted up to `rest_api_error_max_trials` times, sleeping
/// `rest_api_error_cooldown` between attempts. Successful requests are followed by
/// `rest_api_cooldown`. Dropping the returned future cancels any pending sleep.
pub struct RetryingRemoteApi {
    inner: Arc<dyn RemoteApi>,
    config: RetryConfig,
}

impl RetryingRemoteApi {
    pub fn new(config: &SyncConfig, inner: Arc<dyn RemoteApi>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            config: config.into(),
        })
    }
}

#[async_trait]
impl RemoteApi for RetryingRemoteApi {
    async fn fetch(&self, method: &str, request: &FetchRequest) -> Result<FetchPage> {
        let mut trials = 0;

        let page = loop {
            match self.inner.fetch(method, request).await {
                Ok(page) => break page,
                Err(error) if error.is_transient() => {
                    trials += 1;
                    if trials >= self.config.max_trials.get() {
                        return Err(RemoteApiError::MaxTrialsReached {
                            error: Box::new(error),
                            trials: self.config.max_trials,
                        });
                    }

                    warn!(method, trials, %error, "remote api request failed, retrying");

                    time::sleep(self.config.error_cooldown).await;
                    continue;
                }
                Err(error) => return Err(error),
            }
        };

        if !self.config.cooldown.is_zero() {
            time::sleep(self.config.cooldown).await;
        }

        Ok(page)
    }
}
