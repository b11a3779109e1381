//! Database driver seam.
//!
//! The dispatcher talks to the database only through [`Driver`]. The
//! PostgreSQL implementation sits on a lazily connecting sqlx pool; a
//! transaction is an owned `sqlx::Transaction` that rolls back and returns
//! its connection to the pool if dropped unfinished.

use crate::error::{SqlqError, SqlqResult};
use crate::value::SqlqValue;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use sqlx::encode::IsNull;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgPool, PgPoolOptions, PgRow, PgTypeInfo};
use sqlx::query::Query;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::types::{Decimal, Uuid};
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use std::collections::HashMap;

/// One result row: column name → JSON value.
pub type Row = HashMap<String, serde_json::Value>;

/// A full result set.
pub type Rows = Vec<Row>;

/// Capability the dispatcher executes against.
#[async_trait]
pub trait Driver: Send + Sync {
    /// A checked-out connection with an open transaction.
    type Connection: Send;

    /// Run `sql` with positional `binds`, on `conn` when given, otherwise
    /// on a pooled connection.
    async fn query(
        &self,
        sql: &str,
        binds: &[SqlqValue],
        conn: Option<&mut Self::Connection>,
    ) -> SqlqResult<Rows>;

    /// Acquire a connection and start a transaction on it.
    async fn begin(&self) -> SqlqResult<Self::Connection>;

    /// Commit and release the connection.
    async fn commit(&self, conn: Self::Connection) -> SqlqResult<()>;

    /// Roll back and release the connection.
    async fn rollback(&self, conn: Self::Connection) -> SqlqResult<()>;

    /// Close all pooled connections.
    async fn shutdown(&self);
}

/// PostgreSQL driver backed by a sqlx pool.
#[derive(Clone, Debug)]
pub struct PgDriver {
    pool: PgPool,
}

impl PgDriver {
    /// Build a pool for `url`. Connections are opened on first use.
    pub fn connect_lazy(url: &str, max_connections: u32) -> SqlqResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(url)
            .map_err(|e| SqlqError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Driver for PgDriver {
    type Connection = sqlx::Transaction<'static, Postgres>;

    async fn query(
        &self,
        sql: &str,
        binds: &[SqlqValue],
        conn: Option<&mut Self::Connection>,
    ) -> SqlqResult<Rows> {
        let mut query = sqlx::query(sql);
        for value in binds {
            query = bind_value(query, value);
        }

        let rows: Vec<PgRow> = match conn {
            Some(tx) => query.fetch_all(&mut **tx).await?,
            None => query.fetch_all(&self.pool).await?,
        };

        Ok(rows.iter().map(row_to_map).collect())
    }

    async fn begin(&self) -> SqlqResult<Self::Connection> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, conn: Self::Connection) -> SqlqResult<()> {
        Ok(conn.commit().await?)
    }

    async fn rollback(&self, conn: Self::Connection) -> SqlqResult<()> {
        Ok(conn.rollback().await?)
    }

    async fn shutdown(&self) {
        self.pool.close().await;
        tracing::debug!("pool has ended");
    }
}

/// A null sent with an unspecified type (OID 0), so the server infers the
/// parameter type from where it is used.
///
/// Only nulls can travel untyped: sqlx sends parameters in binary format,
/// and a non-null binary payload has to match the inferred type exactly.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> IsNull {
        IsNull::Yes
    }
}

/// Bind one parameter, choosing a concrete Postgres type.
///
/// Null binds untyped. Strings bind as `TEXT`, so a template comparing one
/// with a non-text column needs a cast (`$id::bigint`). Homogeneous arrays
/// bind as typed arrays; mixed or nested arrays fall back to `TEXT[]` of
/// each element's string form.
fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &SqlqValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        SqlqValue::Null => query.bind(UntypedNull),
        SqlqValue::Bool(v) => query.bind(*v),
        SqlqValue::Int(v) => query.bind(*v),
        SqlqValue::Float(v) => query.bind(*v),
        SqlqValue::String(v) => query.bind(v.clone()),
        SqlqValue::Array(items) => {
            if let Some(ints) = collect(items, |v| match v {
                SqlqValue::Int(n) => Some(*n),
                _ => None,
            }) {
                query.bind(ints)
            } else if let Some(floats) = collect(items, |v| match v {
                SqlqValue::Float(f) => Some(*f),
                SqlqValue::Int(n) => Some(*n as f64),
                _ => None,
            }) {
                query.bind(floats)
            } else if let Some(bools) = collect(items, |v| match v {
                SqlqValue::Bool(b) => Some(*b),
                _ => None,
            }) {
                query.bind(bools)
            } else {
                let texts: Vec<Option<String>> = items
                    .iter()
                    .map(|v| (!v.is_null()).then(|| v.to_string()))
                    .collect();
                query.bind(texts)
            }
        }
    }
}

fn collect<T>(items: &[SqlqValue], f: impl Fn(&SqlqValue) -> Option<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        return None;
    }
    items.iter().map(f).collect()
}

/// Convert a PgRow to a HashMap.
fn row_to_map(row: &PgRow) -> Row {
    let mut map = HashMap::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();
        let value = decode_column(row, i, column.type_info().name());
        map.insert(name, value);
    }

    map
}

fn decode_column(row: &PgRow, i: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value;

    fn get<'r, T>(row: &'r PgRow, i: usize) -> Option<T>
    where
        T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
    {
        row.try_get::<Option<T>, _>(i).ok().flatten()
    }

    fn float(v: Option<f64>) -> Value {
        v.and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }

    match type_name {
        "BOOL" => get::<bool>(row, i).map(Value::Bool).unwrap_or(Value::Null),
        "INT2" => get::<i16>(row, i).map(Value::from).unwrap_or(Value::Null),
        "INT4" => get::<i32>(row, i).map(Value::from).unwrap_or(Value::Null),
        "INT8" => get::<i64>(row, i).map(Value::from).unwrap_or(Value::Null),
        "FLOAT4" => float(get::<f32>(row, i).map(f64::from)),
        "FLOAT8" => float(get::<f64>(row, i)),
        "NUMERIC" => float(get::<Decimal>(row, i).and_then(|d| d.to_f64())),
        "JSON" | "JSONB" => get::<Value>(row, i).unwrap_or(Value::Null),
        "UUID" => get::<Uuid>(row, i)
            .map(|u| Value::String(u.to_string()))
            .unwrap_or(Value::Null),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, i)
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null),
        "TIMESTAMP" => get::<NaiveDateTime>(row, i)
            .map(|t| Value::String(naive_iso(&t)))
            .unwrap_or(Value::Null),
        "DATE" => get::<NaiveDate>(row, i)
            .map(|d| Value::String(d.to_string()))
            .unwrap_or(Value::Null),
        "TIME" => get::<NaiveTime>(row, i)
            .map(|t| Value::String(t.to_string()))
            .unwrap_or(Value::Null),
        "INT4[]" => get::<Vec<i32>>(row, i).map(Value::from).unwrap_or(Value::Null),
        "INT8[]" => get::<Vec<i64>>(row, i).map(Value::from).unwrap_or(Value::Null),
        "TEXT[]" | "VARCHAR[]" => get::<Vec<String>>(row, i)
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => get::<String>(row, i).map(Value::String).unwrap_or(Value::Null),
    }
}

/// ISO 8601 with a `T` separator; fractional seconds only when present.
fn naive_iso(t: &NaiveDateTime) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_homogeneous() {
        let ints = vec![SqlqValue::Int(1), SqlqValue::Int(2)];
        let as_int = collect(&ints, |v| match v {
            SqlqValue::Int(n) => Some(*n),
            _ => None,
        });
        assert_eq!(as_int, Some(vec![1, 2]));

        let mixed = vec![SqlqValue::Int(1), SqlqValue::from("x")];
        let as_int = collect(&mixed, |v| match v {
            SqlqValue::Int(n) => Some(*n),
            _ => None,
        });
        assert_eq!(as_int, None);

        assert_eq!(collect::<i64>(&[], |_| Some(0)), None);
    }

    #[test]
    fn test_timestamp_uses_iso_separator() {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(
            naive_iso(&day.and_hms_opt(3, 4, 5).unwrap()),
            "2024-01-02T03:04:05"
        );
        assert_eq!(
            naive_iso(&day.and_hms_milli_opt(3, 4, 5, 600).unwrap()),
            "2024-01-02T03:04:05.600"
        );
    }

    #[test]
    fn test_null_binds_without_a_declared_type() {
        use sqlx::Encode;

        assert_eq!(
            <UntypedNull as sqlx::Type<Postgres>>::type_info(),
            PgTypeInfo::with_oid(Oid(0))
        );
        let mut buf = PgArgumentBuffer::default();
        assert!(matches!(UntypedNull.encode_by_ref(&mut buf), IsNull::Yes));
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_lazy_pool_does_not_connect() {
        let driver = PgDriver::connect_lazy("postgres://nobody@127.0.0.1:1/none", 2).unwrap();
        assert_eq!(driver.pool().size(), 0);
    }
}
