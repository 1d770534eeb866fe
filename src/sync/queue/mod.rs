use std::{fmt, sync::Arc};

use serde_json::Value;
use strum::{Display, EnumString, IntoStaticStr};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    db::{
        Storage,
        models::{ElemQuery, Filter, ID_FIELD, Record, SortKey, record_i64, record_str},
    },
    util::now_mts,
};

use super::{
    config::{QueueConfig, SyncConfig},
    context::{Interrupter, RunId, SyncRunContext},
    process::inserter::{PassOutcome, PassRunner},
    schema::{CollectionRegistry, CollectionSelector, SYNC_QUEUE_TABLE},
    state::SyncStatusManager,
};

pub(crate) mod error;

use error::{QueueError, Result};

const STATE_FIELD: &str = "state";
const SELECTOR_FIELD: &str = "collName";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    New,
    Locked,
    Finished,
    Error,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// One row of the sync queue.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncJob {
    pub id: i64,
    pub selector: CollectionSelector,
    pub state: JobState,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub error: Option<String>,
}

impl SyncJob {
    fn from_record(record: &Record) -> Result<Self> {
        let id = record_i64(record, ID_FIELD).ok_or_else(|| QueueError::InvalidJob {
            id: "?".to_string(),
            reason: format!("missing `{ID_FIELD}`"),
        })?;

        let invalid = |reason: String| QueueError::InvalidJob {
            id: id.to_string(),
            reason,
        };

        let selector = record_str(record, SELECTOR_FIELD)
            .ok_or_else(|| invalid(format!("missing `{SELECTOR_FIELD}`")))?
            .parse::<CollectionSelector>()
            .map_err(|e| invalid(e.to_string()))?;

        let state = record_str(record, STATE_FIELD)
            .ok_or_else(|| invalid(format!("missing `{STATE_FIELD}`")))?
            .parse::<JobState>()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            id,
            selector,
            state,
            created_at: record_i64(record, "createdAt").unwrap_or_default(),
            updated_at: record_i64(record, "updatedAt"),
            error: record_str(record, "error").map(str::to_string),
        })
    }
}

/// What one `process` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub finished: u32,
    pub failed: u32,
    pub interrupted: bool,
    pub purged: u64,
}

/// Persistent, serialized queue of sync jobs.
pub(crate) struct SyncQueue {
    config: QueueConfig,
    storage: Arc<dyn Storage>,
    registry: Arc<CollectionRegistry>,
    runner: Arc<dyn PassRunner>,
    interrupter: Arc<Interrupter>,
    status_manager: Arc<SyncStatusManager>,
    processing: Mutex<()>,
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncQueue {
    pub fn new(
        config: &SyncConfig,
        storage: Arc<dyn Storage>,
        registry: Arc<CollectionRegistry>,
        runner: Arc<dyn PassRunner>,
        interrupter: Arc<Interrupter>,
        status_manager: Arc<SyncStatusManager>,
    ) -> Self {
        Self {
            config: config.into(),
            storage,
            registry,
            runner,
            interrupter,
            status_manager,
            processing: Mutex::new(()),
        }
    }

    async fn jobs_in(&self, states: &[JobState]) -> Result<Vec<SyncJob>> {
        let states = states.iter().map(|s| Value::from(s.as_str())).collect();

        self.storage
            .get_elems(
                SYNC_QUEUE_TABLE,
                &ElemQuery::new(Filter::new().is_in(STATE_FIELD, states))
                    .sorted_by(SortKey::asc(ID_FIELD)),
            )
            .await?
            .iter()
            .map(SyncJob::from_record)
            .collect()
    }

    /// Enqueues `selectors`, skipping any already covered by a pending job. A new `ALL` job
    /// replaces every pending narrower one.
    ///
    /// Returns the number of jobs inserted.
    pub async fn add(&self, selectors: &[CollectionSelector]) -> Result<usize> {
        for selector in selectors {
            self.registry.validate_selector(selector)?;
        }

        // Only NEW jobs absorb requests; ERROR jobs are retried with their own selector
        let pending: Vec<CollectionSelector> = self
            .jobs_in(&[JobState::New])
            .await?
            .into_iter()
            .map(|job| job.selector)
            .collect();

        let covered = |selector: &CollectionSelector, by: &[CollectionSelector]| {
            by.iter().any(|existing| existing.covers(selector))
        };

        let mut to_add: Vec<CollectionSelector> = Vec::new();

        if selectors.contains(&CollectionSelector::All) {
            if covered(&CollectionSelector::All, &pending) {
                return Ok(0);
            }

            let superseded = self
                .storage
                .delete_where(
                    SYNC_QUEUE_TABLE,
                    &Filter::new().eq(STATE_FIELD, JobState::New.as_str()),
                )
                .await?;

            if superseded > 0 {
                debug!(superseded, "pending sync jobs superseded by ALL");
            }

            to_add.push(CollectionSelector::All);
        } else {
            for selector in selectors {
                if !covered(selector, &pending) && !to_add.contains(selector) {
                    to_add.push(selector.clone());
                }
            }
        }

        let now = now_mts();
        let rows: Vec<Record> = to_add
            .iter()
            .map(|selector| {
                let mut row = Record::new();
                row.insert(SELECTOR_FIELD.to_string(), selector.to_string().into());
                row.insert(STATE_FIELD.to_string(), JobState::New.as_str().into());
                row.insert("createdAt".to_string(), now.into());
                row.insert("updatedAt".to_string(), Value::Null);
                row.insert("error".to_string(), Value::Null);
                row
            })
            .collect();

        if !rows.is_empty() {
            self.storage
                .insert_replacing(SYNC_QUEUE_TABLE, &rows, &[])
                .await?;

            let jobs: Vec<String> = to_add.iter().map(ToString::to_string).collect();
            info!(?jobs, "sync jobs enqueued");
        }

        Ok(rows.len())
    }

    async fn next_job(&self, reclaim_locked: bool, attempted: &[i64]) -> Result<Option<SyncJob>> {
        let mut states = vec![JobState::New, JobState::Error];
        if reclaim_locked {
            states.push(JobState::Locked);
        }

        let job = self
            .jobs_in(&states)
            .await?
            .into_iter()
            .find(|job| !attempted.contains(&job.id));

        Ok(job)
    }

    async fn set_state(&self, id: i64, state: JobState, error: Option<String>) -> Result<()> {
        let mut patch = Record::new();
        patch.insert(STATE_FIELD.to_string(), state.as_str().into());
        patch.insert("updatedAt".to_string(), now_mts().into());
        patch.insert("error".to_string(), error.into());

        self.storage
            .update_where(SYNC_QUEUE_TABLE, &Filter::new().eq(ID_FIELD, id), &patch)
            .await?;

        Ok(())
    }

    /// Runs queued jobs oldest first until the queue is drained, a pass is interrupted or the
    /// iteration cap is reached.
    ///
    /// Returns `None` without doing anything while another call is processing.
    pub async fn process(&self) -> Result<Option<QueueReport>> {
        let Ok(_guard) = self.processing.try_lock() else {
            debug!("sync queue is already being processed");
            return Ok(None);
        };

        let cancel = self.interrupter.next_token();
        let mut report = QueueReport::default();
        let mut attempted: Vec<i64> = Vec::new();

        for iteration in 0..self.config.max_iterations().get() {
            // A job still LOCKED on the first iteration was left by a crashed process
            let Some(job) = self.next_job(iteration == 0, &attempted).await? else {
                break;
            };
            attempted.push(job.id);

            self.set_state(job.id, JobState::Locked, None).await?;

            let ctx = SyncRunContext::new(
                RunId::generate(),
                cancel.clone(),
                self.status_manager.clone(),
            );

            info!(
                job_id = job.id,
                run_id = %ctx.run_id(),
                selector = %job.selector,
                "sync job started"
            );

            match self.runner.run_pass(&ctx, &job.selector).await {
                Ok(PassOutcome::Completed | PassOutcome::Unauthorized) => {
                    self.set_state(job.id, JobState::Finished, None).await?;
                    report.finished += 1;
                }
                Ok(PassOutcome::Interrupted) => {
                    self.set_state(job.id, JobState::Error, Some("interrupted".to_string()))
                        .await?;
                    report.failed += 1;
                    report.interrupted = true;
                    break;
                }
                Err(e) => {
                    warn!(job_id = job.id, error = %e, "sync job failed");
                    self.set_state(job.id, JobState::Error, Some(e.to_string()))
                        .await?;
                    report.failed += 1;
                }
            }
        }

        report.purged = self
            .storage
            .delete_where(
                SYNC_QUEUE_TABLE,
                &Filter::new().eq(STATE_FIELD, JobState::Finished.as_str()),
            )
            .await?;

        info!(
            finished = report.finished,
            failed = report.failed,
            interrupted = report.interrupted,
            "sync queue processed"
        );

        Ok(Some(report))
    }

    /// Jobs not yet finished, oldest first.
    pub async fn pending_jobs(&self) -> Result<Vec<SyncJob>> {
        self.jobs_in(&[JobState::New, JobState::Locked, JobState::Error])
            .await
    }
}
