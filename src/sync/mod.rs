mod config;
pub(crate) mod context;
mod engine;
pub(crate) mod error;
pub(crate) mod process;
pub(crate) mod queue;
pub(crate) mod schema;
pub(crate) mod state;

pub use config::SyncConfig;
pub use context::{RunId, SyncRunContext};
pub use engine::{SyncController, SyncEngine};
pub use process::{
    checker::{PendingCollection, PendingSchema},
    hooks::{
        ConvertCurrenciesHook, HookContext, HookReport, RecalcSubAccountLedgersHook, SyncHook,
    },
    inserter::PassOutcome,
    step_tracker::step_data::{StepSelector, SyncUserStepData},
    temp_tables::{TEMP_TABLE_PREFIX, temp_name},
};
pub use queue::{JobState, QueueReport, SyncJob};
pub use schema::{
    CollectionKind, CollectionRegistry, CollectionRole, CollectionSchema, CollectionSelector,
    PUBLIC_COLLS_CONF_TABLE, SUB_USER_ID_FIELD, SYNC_QUEUE_TABLE, SYNC_USER_STEPS_TABLE, Shape,
    USER_ID_FIELD, USERS_TABLE, Visibility,
};
pub use state::{ProgressSink, ProgressSinkError, SyncReader, SyncReceiver, SyncStatus};
