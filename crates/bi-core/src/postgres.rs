//! Optional real `Database` backend over `sqlx`/Postgres, gated behind the
//! `postgres` feature. SPEC_FULL.md §1 puts "the database driver and its row
//! decoding" out of scope as an external collaborator; this adapter is the
//! thin, necessarily-in-scope seam between the allowlist's named-placeholder
//! templates and whatever positional-bind wire format the real driver wants,
//! so the allowlist enforcement invariant (SPEC_FULL.md §8) holds against a
//! real store, not just `DemoDatabase`. It does not attempt a general-purpose
//! row-to-struct mapping layer; each column is decoded into a loosely-typed
//! `serde_json::Value`, mirroring what `executor::project_into_payload`
//! already expects.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Arguments, Column, PgPool, Row as SqlxRow, TypeInfo};

use crate::allowlist::QueryTemplate;
use crate::error::{AppError, AppResult};
use crate::executor::{Database, Row};

pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    /// Connects a small pool (named-placeholder SQL is rewritten to
    /// positional `$N` binds per call, so a single connection happily
    /// pipelines the per-request fan-out cap of 4 concurrent queries).
    pub async fn connect(url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(|e| AppError::Database {
                query_id: "connect".to_string(),
                message: e.to_string(),
            })?;
        Ok(Self { pool })
    }
}

/// Rewrites `:name` placeholders into Postgres `$1, $2, ...` binds in
/// left-to-right order of appearance, producing the matching `PgArguments`.
/// A name may repeat; each occurrence gets its own bind slot (simpler and
/// safer than trying to dedupe positions across heterogeneous value types).
fn rewrite_named_placeholders(
    sql: &str,
    params: &HashMap<String, Value>,
    query_id: &str,
) -> AppResult<(String, PgArguments)> {
    let mut rewritten = String::with_capacity(sql.len());
    let mut args = PgArguments::default();
    let mut chars = sql.char_indices().peekable();
    let mut slot = 0usize;

    while let Some((_, c)) = chars.next() {
        if c != ':' {
            rewritten.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some((_, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || *next == '_' {
                name.push(*next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            rewritten.push(':');
            continue;
        }
        let value = params.get(&name).ok_or_else(|| AppError::MissingParam {
            query_id: query_id.to_string(),
            param: name.clone(),
        })?;
        slot += 1;
        rewritten.push_str(&format!("${slot}"));
        bind_value(&mut args, value).map_err(|e| AppError::Database {
            query_id: query_id.to_string(),
            message: format!("failed to bind `{name}`: {e}"),
        })?;
    }
    Ok((rewritten, args))
}

fn bind_value(args: &mut PgArguments, value: &Value) -> Result<(), sqlx::error::BoxDynError> {
    match value {
        Value::Null => args.add(None::<String>),
        Value::Bool(b) => args.add(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                args.add(i)
            } else {
                args.add(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                args.add(date)
            } else {
                args.add(s.clone())
            }
        }
        other => args.add(other.to_string()),
    }
}

/// Decodes one column into the loosely-typed JSON value `executor.rs`
/// already projects by `output_type`, trying the common SQL scalar kinds in
/// order of how the allowlist templates actually use them.
fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" | "INT4" | "INT8" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOL" => row
            .try_get::<bool, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "TIMESTAMP" | "TIMESTAMPTZ" => row
            .try_get::<chrono::DateTime<chrono::Utc>, _>(index)
            .map(|v| Value::String(v.to_rfc3339()))
            .or_else(|_| {
                row.try_get::<chrono::NaiveDateTime, _>(index)
                    .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S").to_string()))
            })
            .unwrap_or(Value::Null),
        "DATE" => row
            .try_get::<chrono::NaiveDate, _>(index)
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn row_to_map(row: PgRow) -> Row {
    let mut map = BTreeMap::new();
    for column in row.columns() {
        let value = decode_cell(&row, column.ordinal(), column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn execute_query(
        &self,
        template: &QueryTemplate,
        params: &HashMap<String, Value>,
    ) -> AppResult<Vec<Row>> {
        let (sql, args) = rewrite_named_placeholders(template.sql, params, template.id)?;
        let rows = sqlx::query_with(&sql, args)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database {
                query_id: template.id.to_string(),
                message: e.to_string(),
            })?;
        Ok(rows.into_iter().map(row_to_map).collect())
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_named_placeholders_in_order() {
        let mut params = HashMap::new();
        params.insert("date_from".to_string(), Value::String("2025-01-01".to_string()));
        params.insert("date_to".to_string(), Value::String("2025-02-01".to_string()));
        let (sql, _args) = rewrite_named_placeholders(
            "SELECT * FROM t WHERE d >= :date_from AND d < :date_to",
            &params,
            "test",
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE d >= $1 AND d < $2");
    }

    #[test]
    fn missing_param_is_an_error() {
        let params = HashMap::new();
        let result = rewrite_named_placeholders("SELECT * FROM t WHERE d >= :date_from", &params, "test");
        assert!(matches!(result, Err(AppError::MissingParam { .. })));
    }
}
