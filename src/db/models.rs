use serde_json::{Map, Value};

/// A stored row, keyed by column name.
///
/// Rows are schema-less at this layer: the collection registry decides which fields a table
/// carries. The internal auto-increment id is exposed as [`ID_FIELD`].
pub type Record = Map<String, Value>;

/// Auto-increment id every table carries. Used as the watermark of batch jobs.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FilterOp,
}

/// Conjunction of conditions. Comparisons against `NULL` never match, as in SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn with(mut self, field: impl Into<String>, op: FilterOp) -> Self {
        self.conditions.push(Condition {
            field: field.into(),
            op,
        });
        self
    }

    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOp::Eq(value.into()))
    }

    pub fn ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOp::Ne(value.into()))
    }

    pub fn gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOp::Gt(value.into()))
    }

    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOp::Gte(value.into()))
    }

    pub fn lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOp::Lt(value.into()))
    }

    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(field, FilterOp::Lte(value.into()))
    }

    pub fn is_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.with(field, FilterOp::In(values))
    }

    pub fn is_null(self, field: impl Into<String>) -> Self {
        self.with(field, FilterOp::IsNull)
    }

    pub fn is_not_null(self, field: impl Into<String>) -> Self {
        self.with(field, FilterOp::IsNotNull)
    }

    /// Matches `field = value`, or `field IS NULL` when `value` is `None`.
    pub fn eq_or_null(self, field: impl Into<String>, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(value) => self.eq(field, value),
            None => self.is_null(field),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Read request for [`Storage::get_elems`](super::Storage::get_elems).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElemQuery {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
}

impl ElemQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn sorted_by(mut self, key: SortKey) -> Self {
        self.sort.push(key);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Reads an integer column, accepting floats with no fractional part.
pub fn record_i64(record: &Record, field: &str) -> Option<i64> {
    match record.get(field)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        _ => None,
    }
}

pub fn record_f64(record: &Record, field: &str) -> Option<f64> {
    record.get(field)?.as_f64()
}

pub fn record_str<'a>(record: &'a Record, field: &str) -> Option<&'a str> {
    record.get(field)?.as_str()
}
