use std::{collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use lazy_static::lazy_static;
use serde_json::Value;

use crate::db::models::{ID_FIELD, Record, SortKey};

use super::error::{ConfigResult, SyncConfigError};

mod collections;
pub(crate) mod error;

use error::{Result, SchemaError};

pub const SYNC_USER_STEPS_TABLE: &str = "syncUserSteps";
pub const SYNC_QUEUE_TABLE: &str = "syncQueue";
pub const PUBLIC_COLLS_CONF_TABLE: &str = "publicCollsConf";
pub const USERS_TABLE: &str = "users";

/// Owner column stamped on every private row.
pub const USER_ID_FIELD: &str = "user_id";
/// Sub-user column stamped on every private row; `NULL` for plain accounts.
pub const SUB_USER_ID_FIELD: &str = "subUserId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Public,
    Private,
    /// Registered but never synchronized.
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// Historical rows fetched by time range, never removed.
    InsertableAppendOnly,
    /// Current full state, replaced wholesale on every fetch.
    UpdatableSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollectionKind {
    pub visibility: Visibility,
    pub shape: Shape,
}

impl CollectionKind {
    pub const PRIVATE_APPEND_ONLY: Self = Self::new(Visibility::Private, Shape::InsertableAppendOnly);
    pub const PUBLIC_APPEND_ONLY: Self = Self::new(Visibility::Public, Shape::InsertableAppendOnly);
    pub const PUBLIC_SNAPSHOT: Self = Self::new(Visibility::Public, Shape::UpdatableSnapshot);
    pub const HIDDEN_SNAPSHOT: Self = Self::new(Visibility::Hidden, Shape::UpdatableSnapshot);

    pub const fn new(visibility: Visibility, shape: Shape) -> Self {
        Self { visibility, shape }
    }
}

/// What a collection is used for, beyond its generic synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionRole {
    Generic,
    Ledgers,
    Movements,
    Candles,
    PublicTrades,
    TickersHistory,
}

impl CollectionRole {
    /// Public collections whose symbols and start boundaries come from user configuration.
    pub fn is_configurable(&self) -> bool {
        matches!(self, Self::Candles | Self::PublicTrades | Self::TickersHistory)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    name: String,
    api_method: String,
    kind: CollectionKind,
    role: CollectionRole,
    date_field: Option<String>,
    symbol_field: Option<String>,
    timeframe_field: Option<String>,
    sort: Vec<SortKey>,
    max_limit: u64,
    unique_key: Vec<String>,
    fields: Vec<String>,
    derived_copies: Vec<(String, String)>,
}

impl CollectionSchema {
    pub fn new(name: &str, api_method: &str, kind: CollectionKind) -> Self {
        let mut fields = Vec::new();
        if kind.visibility != Visibility::Public {
            fields.push(USER_ID_FIELD.to_string());
            fields.push(SUB_USER_ID_FIELD.to_string());
        }

        Self {
            name: name.to_string(),
            api_method: api_method.to_string(),
            kind,
            role: CollectionRole::Generic,
            date_field: None,
            symbol_field: None,
            timeframe_field: None,
            sort: Vec::new(),
            max_limit: 1_000,
            unique_key: Vec::new(),
            fields,
            derived_copies: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: CollectionRole) -> Self {
        self.role = role;
        self
    }

    /// Sets the timestamp field. Also sorts "most recent first" by it, unless a sort was set.
    pub fn with_date_field(mut self, field: &str) -> Self {
        self.date_field = Some(field.to_string());
        if self.sort.is_empty() {
            self.sort = vec![SortKey::desc(field)];
        }
        self
    }

    pub fn with_symbol_field(mut self, field: &str) -> Self {
        self.symbol_field = Some(field.to_string());
        self
    }

    pub fn with_timeframe_field(mut self, field: &str) -> Self {
        self.timeframe_field = Some(field.to_string());
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortKey>) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_max_limit(mut self, max_limit: u64) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn with_unique_key(mut self, fields: &[&str]) -> Self {
        self.unique_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        for field in fields {
            if !self.fields.iter().any(|f| f == field) {
                self.fields.push(field.to_string());
            }
        }
        self
    }

    /// Copies `from` into `to` when rows are normalized on insert.
    pub fn with_derived_copy(mut self, from: &str, to: &str) -> Self {
        self.derived_copies.push((from.to_string(), to.to_string()));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn api_method(&self) -> &str {
        &self.api_method
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn role(&self) -> CollectionRole {
        self.role
    }

    pub fn date_field(&self) -> Option<&str> {
        self.date_field.as_deref()
    }

    pub fn symbol_field(&self) -> Option<&str> {
        self.symbol_field.as_deref()
    }

    pub fn timeframe_field(&self) -> Option<&str> {
        self.timeframe_field.as_deref()
    }

    pub fn sort(&self) -> &[SortKey] {
        &self.sort
    }

    pub fn max_limit(&self) -> u64 {
        self.max_limit
    }

    pub fn unique_key(&self) -> &[String] {
        &self.unique_key
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn is_public(&self) -> bool {
        self.kind.visibility == Visibility::Public
    }

    pub fn is_private(&self) -> bool {
        self.kind.visibility == Visibility::Private
    }

    pub fn is_hidden(&self) -> bool {
        self.kind.visibility == Visibility::Hidden
    }

    pub fn is_append_only(&self) -> bool {
        self.kind.shape == Shape::InsertableAppendOnly
    }

    /// Projects an API item onto the declared field set.
    ///
    /// Declared fields missing from `item` are stored as `NULL`, so a re-fetched row resets any
    /// field derived after insertion. `stamp` supplies values the API does not return (owner
    /// ids, symbol, timeframe) and takes precedence over the item.
    pub fn normalize(&self, item: &Record, stamp: &Record) -> Record {
        let mut row = Record::new();

        for field in &self.fields {
            if field == ID_FIELD {
                continue;
            }
            let value = stamp
                .get(field)
                .or_else(|| item.get(field))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert(field.clone(), value);
        }

        for (from, to) in &self.derived_copies {
            let value = row.get(from).cloned().unwrap_or(Value::Null);
            row.insert(to.clone(), value);
        }

        row
    }

    fn validate(&self) -> Result<()> {
        let valid_name = !self.name.is_empty()
            && self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(SchemaError::InvalidName(self.name.clone()));
        }

        if self.api_method.is_empty() {
            return Err(SchemaError::MissingApiMethod(self.name.clone()));
        }

        if self.max_limit == 0 {
            return Err(SchemaError::ZeroMaxLimit(self.name.clone()));
        }

        if self.unique_key.is_empty() {
            return Err(SchemaError::EmptyUniqueKey(self.name.clone()));
        }

        if self.is_append_only() && self.date_field.is_none() {
            return Err(SchemaError::MissingDateField(self.name.clone()));
        }

        let missing_role_field = |field: &str| SchemaError::MissingRoleField {
            collection: self.name.clone(),
            field: field.to_string(),
        };

        if self.role.is_configurable() && self.symbol_field.is_none() {
            return Err(missing_role_field("symbol"));
        }

        if self.role == CollectionRole::Candles && self.timeframe_field.is_none() {
            return Err(missing_role_field("timeframe"));
        }

        let referenced = self
            .unique_key
            .iter()
            .chain(self.date_field.iter())
            .chain(self.symbol_field.iter())
            .chain(self.timeframe_field.iter())
            .chain(self.sort.iter().map(|key| &key.field))
            .chain(self.derived_copies.iter().flat_map(|(from, to)| [from, to]));

        for field in referenced {
            if !self.fields.contains(field) {
                return Err(SchemaError::UndeclaredField {
                    collection: self.name.clone(),
                    field: field.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Which collections a sync job covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CollectionSelector {
    All,
    Public,
    Private,
    Collection(String),
}

impl CollectionSelector {
    pub fn covers(&self, other: &CollectionSelector) -> bool {
        self == &Self::All || self == other
    }
}

impl fmt::Display for CollectionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "ALL"),
            Self::Public => write!(f, "PUBLIC"),
            Self::Private => write!(f, "PRIVATE"),
            Self::Collection(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for CollectionSelector {
    type Err = SyncConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if s.eq_ignore_ascii_case("public") {
            return Ok(Self::Public);
        }
        if s.eq_ignore_ascii_case("private") {
            return Ok(Self::Private);
        }

        let valid_name = !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid_name {
            return Err(SyncConfigError::InvalidSelector(s.to_string()));
        }

        Ok(Self::Collection(s.to_string()))
    }
}

/// Validated, read-only set of collection descriptors.
#[derive(Debug)]
pub struct CollectionRegistry {
    collections: Vec<Arc<CollectionSchema>>,
}

lazy_static! {
    static ref STANDARD_REGISTRY: Arc<CollectionRegistry> = Arc::new(
        CollectionRegistry::new(collections::standard_collections())
            .expect("standard collections are valid")
    );
}

impl CollectionRegistry {
    pub fn new(collections: Vec<CollectionSchema>) -> Result<Self> {
        let mut names = BTreeSet::new();

        for schema in &collections {
            schema.validate()?;

            if !names.insert(schema.name.clone()) {
                return Err(SchemaError::DuplicateCollection(schema.name.clone()));
            }
        }

        Ok(Self {
            collections: collections.into_iter().map(Arc::new).collect(),
        })
    }

    /// The exchange collections this crate knows how to synchronize.
    pub fn standard() -> Arc<Self> {
        STANDARD_REGISTRY.clone()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<CollectionSchema>> {
        self.collections.iter().find(|schema| schema.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<CollectionSchema>> {
        self.collections.iter()
    }

    pub fn by_role(&self, role: CollectionRole) -> Option<&Arc<CollectionSchema>> {
        self.collections.iter().find(|schema| schema.role == role)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Synchronizable collections covered by `selector`. Hidden collections are never selected.
    pub fn select(&self, selector: &CollectionSelector) -> Vec<Arc<CollectionSchema>> {
        self.collections
            .iter()
            .filter(|schema| !schema.is_hidden())
            .filter(|schema| match selector {
                CollectionSelector::All => true,
                CollectionSelector::Public => schema.is_public(),
                CollectionSelector::Private => schema.is_private(),
                CollectionSelector::Collection(name) => &schema.name == name,
            })
            .cloned()
            .collect()
    }

    /// Checks that `selector` names a known collection.
    pub fn validate_selector(&self, selector: &CollectionSelector) -> ConfigResult<()> {
        if let CollectionSelector::Collection(name) = selector
            && !self.contains(name)
        {
            return Err(SyncConfigError::InvalidSelector(name.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests;
