//! In-memory driver for exercising the dispatcher without a database.
//!
//! It understands just enough of the fixture templates to behave like a
//! table of `(id, name)` rows with transactional staging; every other
//! statement echoes its SQL and binds back as a single row.

#![allow(dead_code)]

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use sqlq::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct MockConn {
    staged: Vec<(i64, String)>,
    pub fail_commit: bool,
}

#[derive(Debug, Default)]
pub struct MockDriver {
    calls: AtomicUsize,
    begins: AtomicUsize,
    shutdowns: AtomicUsize,
    table: Mutex<BTreeMap<i64, String>>,
    pub fail_begin: AtomicBool,
    pub fail_commit: AtomicBool,
    pub statements: Mutex<Vec<(String, Vec<SqlqValue>)>>,
}

impl MockDriver {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn last_statement(&self) -> Option<(String, Vec<SqlqValue>)> {
        self.statements.lock().unwrap().last().cloned()
    }
}

fn int(value: Option<&SqlqValue>) -> SqlqResult<i64> {
    match value {
        Some(SqlqValue::Int(n)) => Ok(*n),
        other => Err(SqlqError::Execution(format!("expected integer, got {:?}", other))),
    }
}

fn text(value: Option<&SqlqValue>) -> SqlqResult<String> {
    match value {
        Some(SqlqValue::String(s)) => Ok(s.clone()),
        other => Err(SqlqError::Execution(format!("expected text, got {:?}", other))),
    }
}

/// Binds in the order their `$n` markers appear in the SQL text, so a
/// column list can be matched against `values ($2, $1)` positionally.
fn marker_binds<'a>(sql: &str, binds: &'a [SqlqValue]) -> Vec<&'a SqlqValue> {
    let markers = Regex::new(r"\$(\d+)").unwrap();
    markers
        .captures_iter(sql)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .filter_map(|n| binds.get(n.checked_sub(1)?))
        .collect()
}

pub fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect::<HashMap<_, _>>()
}

#[async_trait]
impl Driver for MockDriver {
    type Connection = MockConn;

    async fn query(
        &self,
        sql: &str,
        binds: &[SqlqValue],
        conn: Option<&mut MockConn>,
    ) -> SqlqResult<Rows> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), binds.to_vec()));

        let lower = sql.trim().to_lowercase();
        if lower.contains("no_such_table") {
            return Err(SqlqError::Execution(
                "relation \"no_such_table\" does not exist".into(),
            ));
        }
        // Mirror the database rejecting unresolved placeholders.
        if let Some(token) = sqlq::render::unresolved_placeholders(sql).first() {
            return Err(SqlqError::Execution(format!(
                "syntax error at or near \"{}\"",
                token
            )));
        }

        let values = marker_binds(sql, binds);

        if lower.starts_with("insert into sqlq_test_rows (id, name)") {
            let id = int(values.first().copied())?;
            let name = text(values.get(1).copied())?;
            match conn {
                Some(conn) => conn.staged.push((id, name)),
                None => {
                    self.table.lock().unwrap().insert(id, name);
                }
            }
            return Ok(Vec::new());
        }

        if lower.starts_with("select id, name") {
            let id = int(values.first().copied())?;
            let staged = conn.and_then(|c| {
                c.staged
                    .iter()
                    .rev()
                    .find(|(sid, _)| *sid == id)
                    .map(|(_, name)| name.clone())
            });
            let found = staged.or_else(|| self.table.lock().unwrap().get(&id).cloned());
            return Ok(found
                .map(|name| vec![row(&[("id", json!(id)), ("name", json!(name))])])
                .unwrap_or_default());
        }

        let shown: Vec<String> = binds.iter().map(|b| b.to_string()).collect();
        Ok(vec![row(&[
            ("sql", json!(sql)),
            ("binds", json!(shown)),
            ("call", json!(call)),
        ])])
    }

    async fn begin(&self) -> SqlqResult<MockConn> {
        if self.fail_begin.load(Ordering::SeqCst) {
            return Err(SqlqError::Connection("pool exhausted".into()));
        }
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            staged: Vec::new(),
            fail_commit: self.fail_commit.load(Ordering::SeqCst),
        })
    }

    async fn commit(&self, conn: MockConn) -> SqlqResult<()> {
        if conn.fail_commit {
            return Err(SqlqError::Execution("could not serialize access".into()));
        }
        let mut table = self.table.lock().unwrap();
        for (id, name) in conn.staged {
            table.insert(id, name);
        }
        Ok(())
    }

    async fn rollback(&self, _conn: MockConn) -> SqlqResult<()> {
        Ok(())
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shared handle so tests can inspect the driver after handing it over.
#[derive(Debug, Default, Clone)]
pub struct SharedMock(pub Arc<MockDriver>);

#[async_trait]
impl Driver for SharedMock {
    type Connection = MockConn;

    async fn query(
        &self,
        sql: &str,
        binds: &[SqlqValue],
        conn: Option<&mut MockConn>,
    ) -> SqlqResult<Rows> {
        self.0.query(sql, binds, conn).await
    }

    async fn begin(&self) -> SqlqResult<MockConn> {
        self.0.begin().await
    }

    async fn commit(&self, conn: MockConn) -> SqlqResult<()> {
        self.0.commit(conn).await
    }

    async fn rollback(&self, conn: MockConn) -> SqlqResult<()> {
        self.0.rollback(conn).await
    }

    async fn shutdown(&self) {
        self.0.shutdown().await
    }
}

pub fn sql_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("sql")
}

pub fn config(enable_cache: bool) -> Config {
    Config::builder()
        .sql_directory(sql_dir())
        .enable_cache(enable_cache)
        .build()
}

/// A dispatcher plus a handle on its driver.
pub fn setup(enable_cache: bool) -> (SqlqDB<SharedMock>, Arc<MockDriver>) {
    let mock = Arc::new(MockDriver::default());
    let db = SqlqDB::init(config(enable_cache), SharedMock(Arc::clone(&mock))).unwrap();
    (db, mock)
}

pub fn params(pairs: &[(&str, SqlqValue)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}
