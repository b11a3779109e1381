//! Query execution engine.
//!
//! [`SqlqDB`] resolves a named query to cached rows or to a rendered
//! template executed through a [`Driver`], and manages explicit
//! transactions that pin a sequence of named queries to one connection.

use crate::cache::{cache_key, CacheConfig, CacheOp, CacheReport, QueryCache};
use crate::config::Config;
use crate::driver::{Driver, PgDriver, Rows};
use crate::error::{SqlqError, SqlqResult};
use crate::policy::{CachePolicy, Cacheability};
use crate::render::{render, unresolved_placeholders, Rendered};
use crate::report::{abbreviate, Diagnostics, ReporterFn};
use crate::template::TemplateStore;
use crate::value::Params;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_TRANSACTION: AtomicU64 = AtomicU64::new(1);

/// An open transaction on one checked-out connection.
///
/// Pass `Some(&mut tx)` to [`SqlqDB::execute`] to run queries inside it,
/// then hand it to exactly one of [`SqlqDB::commit_transaction`] or
/// [`SqlqDB::rollback_transaction`]. Dropping it unfinished releases the
/// connection; with the PostgreSQL driver the transaction is rolled back.
pub struct Transaction<C> {
    id: u64,
    conn: Option<C>,
}

impl<C> Transaction<C> {
    fn new(conn: C) -> Self {
        Self {
            id: NEXT_TRANSACTION.fetch_add(1, Ordering::Relaxed),
            conn: Some(conn),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn conn_mut(&mut self) -> SqlqResult<&mut C> {
        self.conn
            .as_mut()
            .ok_or_else(|| SqlqError::transaction(format!("transaction {} is closed", self.id)))
    }

    fn take(&mut self) -> SqlqResult<C> {
        self.conn
            .take()
            .ok_or_else(|| SqlqError::transaction(format!("transaction {} is closed", self.id)))
    }
}

impl<C> Drop for Transaction<C> {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::warn!(
                transaction = self.id,
                "transaction dropped without commit or rollback"
            );
        }
    }
}

impl<C> std::fmt::Debug for Transaction<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("open", &self.conn.is_some())
            .finish()
    }
}

/// Named-query executor with result caching.
pub struct SqlqDB<D: Driver = PgDriver> {
    driver: D,
    templates: TemplateStore,
    cache: QueryCache,
    policy: Cacheability,
    diagnostics: Diagnostics,
    strict_substitution: bool,
}

impl SqlqDB<PgDriver> {
    /// Initialise against PostgreSQL using `config.database_url`.
    ///
    /// The pool connects lazily, so this succeeds without a reachable
    /// database.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let db = SqlqDB::connect(Config::builder()
    ///     .database("postgres://localhost/app")
    ///     .sql_directory("sql")
    ///     .enable_cache(true)
    ///     .build())?;
    /// ```
    pub fn connect(config: Config) -> SqlqResult<Self> {
        let driver = PgDriver::connect_lazy(&config.database_url, config.max_connections)?;
        Self::init(config, driver)
    }
}

impl<D: Driver> SqlqDB<D> {
    /// Initialise with an explicit driver.
    pub fn init(mut config: Config, driver: D) -> SqlqResult<Self> {
        config.validate()?;

        let diagnostics = Diagnostics::new(config.log.clone());
        let cache = QueryCache::new(CacheConfig {
            enabled: config.enable_cache,
            max_entries: config.max_entries,
        });
        diagnostics.debug(&format!("sqlq/init: cache enabled = {}", cache.is_enabled()));

        Ok(Self {
            driver,
            templates: TemplateStore::new(config.sql_directory),
            cache,
            policy: Cacheability::default(),
            diagnostics,
            strict_substitution: config.strict_substitution,
        })
    }

    /// Install a diagnostic sink receiving `(error, message)` pairs.
    pub fn with_reporter<F>(mut self, reporter: F) -> Self
    where
        F: Fn(Option<&SqlqError>, &str) + Send + Sync + 'static,
    {
        let reporter: ReporterFn = Arc::new(reporter);
        self.diagnostics.set_reporter(reporter);
        self
    }

    /// Install a cacheability override. Transaction-control names stay
    /// uncacheable whatever it answers.
    pub fn with_cache_policy<P>(mut self, policy: P) -> Self
    where
        P: CachePolicy + 'static,
    {
        self.policy = Cacheability::new(Some(Arc::new(policy)));
        self
    }

    /// Release all pooled connections.
    pub async fn exit(&self) {
        self.driver.shutdown().await;
        self.diagnostics.debug("sqlq/exit: driver shut down");
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn is_cacheable(&self, name: &str) -> bool {
        self.policy.is_cacheable(name)
    }

    /// Run a cache management command: `clear`, `keys` or `stats`.
    pub fn cache_command(&self, command: &str) -> SqlqResult<CacheReport> {
        let op: CacheOp = command.parse()?;
        Ok(self.cache.run(op))
    }

    /// Load and render a template without executing it.
    pub fn render(&self, name: &str, params: &Params) -> SqlqResult<Rendered> {
        let raw = self.templates.load(name)?;
        let rendered = render(&raw, params)?;

        let unresolved = unresolved_placeholders(&rendered.sql);
        if !unresolved.is_empty() {
            if self.strict_substitution {
                return Err(SqlqError::SubstitutionIncomplete {
                    name: name.to_string(),
                    placeholders: unresolved,
                });
            }
            tracing::warn!(name, placeholders = ?unresolved, "unresolved placeholders");
        }

        Ok(rendered)
    }

    /// Execute the named query.
    ///
    /// Cacheable queries outside a transaction are served from the cache
    /// when possible and stored after a successful execution. Queries
    /// pinned to `tx` always reach the database and are never cached, so
    /// uncommitted rows cannot leak to other callers.
    ///
    /// With `throw_on_error` false every failure is reported as a
    /// diagnostic and an empty row set is returned.
    pub async fn execute(
        &self,
        name: &str,
        params: &Params,
        throw_on_error: bool,
        tx: Option<&mut Transaction<D::Connection>>,
    ) -> SqlqResult<Rows> {
        let start = Instant::now();
        let use_cache = tx.is_none() && self.is_cacheable(name);

        if use_cache {
            if let Some(rows) = self.from_cache(name, params) {
                self.diagnostics.debug(&format!(
                    "sqlq/execute: from cache, name = \"{}\", elapsed time = {}ms",
                    name,
                    start.elapsed().as_millis()
                ));
                return Ok(rows);
            }
        }

        let rows = match self.from_template(name, params, tx).await {
            Ok(rows) => rows,
            Err(e) => {
                self.diagnostics
                    .error(&e, &format!("sqlq/execute: name = \"{}\" failed", name));
                if throw_on_error {
                    return Err(e);
                }
                return Ok(Vec::new());
            }
        };

        if use_cache && self.cache.is_enabled() {
            let key = cache_key(name, params);
            self.cache.set(&key, rows.clone());
            self.diagnostics.debug(&format!(
                "sqlq/execute: cached, key = {}",
                abbreviate(&key, 100)
            ));
        }

        let elapsed = start.elapsed().as_millis();
        tracing::debug!(name, rows = rows.len(), elapsed_ms = elapsed as u64, "query executed");
        self.diagnostics.debug(&format!(
            "sqlq/execute: from template, name = \"{}\", elapsed time = {}ms",
            name, elapsed
        ));

        Ok(rows)
    }

    fn from_cache(&self, name: &str, params: &Params) -> Option<Rows> {
        if !self.cache.is_enabled() {
            return None;
        }

        let key = cache_key(name, params);
        match self.cache.get(&key) {
            Some(rows) => {
                self.diagnostics.debug(&format!(
                    "sqlq/cache: hit, name = {}, key = {}, row count = {}",
                    name,
                    abbreviate(&key, 100),
                    rows.len()
                ));
                if let Some(first) = rows.first() {
                    let preview = serde_json::to_string(first).unwrap_or_default();
                    self.diagnostics
                        .debug(&format!("sqlq/cache: rows[0] = {}", abbreviate(&preview, 100)));
                }
                if self.diagnostics.logs_results(name) {
                    self.log_results(&rows);
                }
                Some(rows)
            }
            None => {
                self.diagnostics
                    .debug(&format!("sqlq/cache: miss, name = {}", name));
                None
            }
        }
    }

    async fn from_template(
        &self,
        name: &str,
        params: &Params,
        tx: Option<&mut Transaction<D::Connection>>,
    ) -> SqlqResult<Rows> {
        let Rendered { sql, binds } = self.render(name, params)?;
        let log_queries = self.diagnostics.logs_queries(name);

        if log_queries {
            let shown: Vec<String> = binds.iter().map(|b| b.to_string()).collect();
            self.diagnostics.debug(&format!(
                "sqlq/query: name = \"{}\", query =\n{}, substitutions = {}",
                name,
                sql,
                shown.join(" | ")
            ));
        }

        let started = Instant::now();
        let conn = match tx {
            Some(tx) => Some(tx.conn_mut()?),
            None => None,
        };
        let rows = self.driver.query(&sql, &binds, conn).await?;

        if log_queries {
            self.diagnostics.debug(&format!(
                "sqlq/query: name = \"{}\", {} rows returned ({}ms)",
                name,
                rows.len(),
                started.elapsed().as_millis()
            ));
            if self.diagnostics.logs_results(name) {
                self.log_results(&rows);
            }
        }

        Ok(rows)
    }

    fn log_results(&self, rows: &Rows) {
        let json = serde_json::to_string(rows).unwrap_or_default();
        self.diagnostics
            .debug(&format!("sqlq/query: results = {}", json));
    }

    // ---------------------------------------------------------------
    // transactions
    // ---------------------------------------------------------------

    /// Acquire a connection and open a transaction on it.
    ///
    /// On failure returns `Err` when `throw_on_error`, otherwise `Ok(None)`.
    pub async fn begin_transaction(
        &self,
        throw_on_error: bool,
    ) -> SqlqResult<Option<Transaction<D::Connection>>> {
        match self.driver.begin().await {
            Ok(conn) => {
                let tx = Transaction::new(conn);
                tracing::debug!(transaction = tx.id, "transaction opened");
                Ok(Some(tx))
            }
            Err(e) => {
                self.diagnostics.error(&e, "sqlq/beginTransaction: error");
                if throw_on_error {
                    Err(e)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Commit and release the connection.
    ///
    /// A missing handle is always an error.
    pub async fn commit_transaction(
        &self,
        tx: Option<Transaction<D::Connection>>,
        throw_on_error: bool,
    ) -> SqlqResult<()> {
        self.finish(tx, throw_on_error, Finish::Commit).await
    }

    /// Roll back and release the connection.
    ///
    /// A missing handle is always an error.
    pub async fn rollback_transaction(
        &self,
        tx: Option<Transaction<D::Connection>>,
        throw_on_error: bool,
    ) -> SqlqResult<()> {
        self.finish(tx, throw_on_error, Finish::Rollback).await
    }

    async fn finish(
        &self,
        tx: Option<Transaction<D::Connection>>,
        throw_on_error: bool,
        how: Finish,
    ) -> SqlqResult<()> {
        let Some(mut tx) = tx else {
            let err = SqlqError::transaction(format!("{}: no open transaction", how.label()));
            self.diagnostics
                .error(&err, &format!("sqlq/{}Transaction: missing handle", how.label()));
            return Err(err);
        };

        let id = tx.id;
        let result = match tx.take() {
            Ok(conn) => match how {
                Finish::Commit => self.driver.commit(conn).await,
                Finish::Rollback => self.driver.rollback(conn).await,
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::debug!(transaction = id, "transaction {}", how.past());
                Ok(())
            }
            Err(e) => {
                self.diagnostics
                    .error(&e, &format!("sqlq/{}Transaction: error", how.label()));
                if throw_on_error {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Finish {
    Commit,
    Rollback,
}

impl Finish {
    fn label(self) -> &'static str {
        match self {
            Finish::Commit => "commit",
            Finish::Rollback => "rollback",
        }
    }

    fn past(self) -> &'static str {
        match self {
            Finish::Commit => "committed",
            Finish::Rollback => "rolled back",
        }
    }
}
