use std::collections::BTreeMap;

use serde_json::Value;
use sqlx::{Postgres, QueryBuilder, types::Json};

use super::super::{
    error::{DbError, Result},
    models::{ElemQuery, Filter, FilterOp, ID_FIELD, Record, SortDirection},
};

pub(super) type PgQuery = QueryBuilder<'static, Postgres>;

pub(super) fn quote_ident(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }

    Ok(format!("\"{name}\""))
}

fn quote_list(names: &[String]) -> Result<String> {
    let quoted = names
        .iter()
        .map(|name| quote_ident(name))
        .collect::<Result<Vec<_>>>()?;

    Ok(quoted.join(", "))
}

fn push_value(qb: &mut PgQuery, value: &Value) {
    match value {
        Value::Null => {
            qb.push("NULL");
        }
        Value::Bool(b) => {
            qb.push_bind(*b);
        }
        Value::Number(n) => match n.as_i64() {
            Some(i) => {
                qb.push_bind(i);
            }
            None => {
                qb.push_bind(n.as_f64().unwrap_or(f64::NAN));
            }
        },
        Value::String(s) => {
            qb.push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            qb.push_bind(Json(value.clone()));
        }
    }
}

fn push_filter(qb: &mut PgQuery, filter: &Filter) -> Result<()> {
    if filter.is_empty() {
        return Ok(());
    }

    qb.push(" WHERE ");

    for (i, condition) in filter.conditions().iter().enumerate() {
        if i > 0 {
            qb.push(" AND ");
        }

        let column = quote_ident(&condition.field)?;

        let (operator, value) = match &condition.op {
            FilterOp::IsNull => {
                qb.push(format!("{column} IS NULL"));
                continue;
            }
            FilterOp::IsNotNull => {
                qb.push(format!("{column} IS NOT NULL"));
                continue;
            }
            FilterOp::In(values) if values.is_empty() => {
                qb.push("FALSE");
                continue;
            }
            FilterOp::In(values) => {
                qb.push(format!("{column} IN ("));
                for (j, value) in values.iter().enumerate() {
                    if j > 0 {
                        qb.push(", ");
                    }
                    push_value(qb, value);
                }
                qb.push(")");
                continue;
            }
            FilterOp::Eq(value) => ("=", value),
            FilterOp::Ne(value) => ("<>", value),
            FilterOp::Gt(value) => (">", value),
            FilterOp::Gte(value) => (">=", value),
            FilterOp::Lt(value) => ("<", value),
            FilterOp::Lte(value) => ("<=", value),
        };

        qb.push(format!("{column} {operator} "));
        push_value(qb, value);
    }

    Ok(())
}

pub(super) fn select_elems(table: &str, query: &ElemQuery) -> Result<PgQuery> {
    let mut qb = PgQuery::new(format!(
        "SELECT to_jsonb(t) AS row FROM {} AS t",
        quote_ident(table)?
    ));

    push_filter(&mut qb, &query.filter)?;

    qb.push(" ORDER BY ");
    if query.sort.is_empty() {
        qb.push(quote_ident(ID_FIELD)?);
    } else {
        let mut order = Vec::with_capacity(query.sort.len());
        for key in &query.sort {
            let direction = match key.direction {
                SortDirection::Asc => "ASC",
                SortDirection::Desc => "DESC",
            };
            order.push(format!("{} {direction}", quote_ident(&key.field)?));
        }
        qb.push(order.join(", "));
    }

    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }

    Ok(qb)
}

fn conflict_clause(columns: &[String], unique_key: &[String]) -> Result<String> {
    if unique_key.is_empty() {
        return Ok(String::new());
    }

    let updates = columns
        .iter()
        .filter(|column| !unique_key.contains(column))
        .map(|column| quote_ident(column).map(|c| format!("{c} = EXCLUDED.{c}")))
        .collect::<Result<Vec<_>>>()?;

    let target = quote_list(unique_key)?;

    if updates.is_empty() {
        Ok(format!(" ON CONFLICT ({target}) DO NOTHING"))
    } else {
        Ok(format!(
            " ON CONFLICT ({target}) DO UPDATE SET {}",
            updates.join(", ")
        ))
    }
}

/// Builds one statement per distinct column set, so rows never reset columns they don't carry.
///
/// Rows sharing a unique key within the same batch collapse to the last occurrence, since
/// `ON CONFLICT DO UPDATE` can't touch the same row twice in one statement.
pub(super) fn insert_replacing(
    table: &str,
    rows: &[Record],
    unique_key: &[String],
) -> Result<Vec<PgQuery>> {
    let table_ident = quote_ident(table)?;

    let mut groups: BTreeMap<Vec<String>, Vec<Value>> = BTreeMap::new();
    for row in rows {
        let mut row = row.clone();
        row.remove(ID_FIELD);

        let columns: Vec<String> = row.keys().cloned().collect();
        if columns.is_empty() {
            continue;
        }

        let group = groups.entry(columns).or_default();

        if !unique_key.is_empty() {
            let same_key = |other: &Value| {
                unique_key
                    .iter()
                    .all(|field| other.get(field) == row.get(field))
            };
            group.retain(|other| !same_key(other));
        }

        group.push(Value::Object(row));
    }

    let mut statements = Vec::with_capacity(groups.len());
    for (columns, group_rows) in groups {
        let column_list = quote_list(&columns)?;

        let mut qb = PgQuery::new(format!(
            "INSERT INTO {table_ident} ({column_list}) SELECT {column_list} \
             FROM jsonb_populate_recordset(NULL::{table_ident}, "
        ));
        qb.push_bind(Json(Value::Array(group_rows)));
        qb.push(")");
        qb.push(conflict_clause(&columns, unique_key)?);

        statements.push(qb);
    }

    Ok(statements)
}

pub(super) fn update_where(table: &str, filter: &Filter, patch: &Record) -> Result<Option<PgQuery>> {
    if patch.is_empty() {
        return Ok(None);
    }

    let mut qb = PgQuery::new(format!("UPDATE {} SET ", quote_ident(table)?));

    for (i, (field, value)) in patch.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(format!("{} = ", quote_ident(field)?));
        push_value(&mut qb, value);
    }

    push_filter(&mut qb, filter)?;

    Ok(Some(qb))
}

pub(super) fn delete_where(table: &str, filter: &Filter) -> Result<PgQuery> {
    let mut qb = PgQuery::new(format!("DELETE FROM {}", quote_ident(table)?));
    push_filter(&mut qb, filter)?;
    Ok(qb)
}

pub(super) fn create_table_like(table: &str, template: &str) -> Result<String> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (LIKE {} INCLUDING ALL)",
        quote_ident(table)?,
        quote_ident(template)?
    ))
}

pub(super) fn drop_table(table: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_ident(table)?))
}

pub(super) const TABLE_COLUMNS: &str = r#"
    SELECT column_name::text
    FROM information_schema.columns
    WHERE table_schema = current_schema() AND table_name = $1
    ORDER BY ordinal_position
"#;

pub(super) const TABLE_EXISTS: &str = r#"
    SELECT EXISTS (
        SELECT 1
        FROM information_schema.tables
        WHERE table_schema = current_schema() AND table_name = $1
    )
"#;

pub(super) const TABLES_WITH_PREFIX: &str = r#"
    SELECT table_name::text
    FROM information_schema.tables
    WHERE table_schema = current_schema() AND left(table_name, length($1)) = $1
    ORDER BY table_name
"#;

pub(super) fn merge_table(
    from: &str,
    into: &str,
    columns: &[String],
    unique_key: &[String],
) -> Result<String> {
    let columns: Vec<String> = columns
        .iter()
        .filter(|column| column.as_str() != ID_FIELD)
        .cloned()
        .collect();

    if columns.is_empty() {
        return Err(DbError::NoColumns {
            table: from.to_string(),
        });
    }

    let column_list = quote_list(&columns)?;

    Ok(format!(
        "INSERT INTO {} ({column_list}) SELECT {column_list} FROM {} ORDER BY {}{}",
        quote_ident(into)?,
        quote_ident(from)?,
        quote_ident(ID_FIELD)?,
        conflict_clause(&columns, unique_key)?
    ))
}
