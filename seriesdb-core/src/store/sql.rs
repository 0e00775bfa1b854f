//! SQLite-backed series store
//!
//! One table per metric, named after the metric id:
//!
//! ```sql
//! CREATE TABLE <id> (timestamp INTEGER PRIMARY KEY ASC, value REAL) WITHOUT ROWID
//! ```
//!
//! Tables are created lazily on first use. Creation is optimistic: a
//! "table already exists" failure means another thread or process won the
//! race and is treated as success.
//!
//! Every call runs on a short-lived connection of its own unless the calling
//! thread has a bound one. Batches bind a connection so the whole batch
//! commits in one transaction.

use super::{min_option, CounterAdapter, SeriesStore, SqlStoreConfig, StagedBaselines};
use crate::metric::Metric;
use crate::series::DefaultSeries;
use crate::{Batch, Result, SeriesError, TimeRange, Timestamp, Value};
use parking_lot::RwLock;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Transaction, TransactionBehavior,
};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

thread_local! {
    static BOUND: RefCell<Option<(PathBuf, Rc<Connection>)>> = const { RefCell::new(None) };
}

/// Outcome of an optimistic `CREATE TABLE`
#[derive(Debug)]
enum TableCreation {
    Created,
    AlreadyExists,
    Failed(rusqlite::Error),
}

/// A store persisting every metric in its own SQLite table
pub struct SqlSeriesStore {
    name: String,
    config: SqlStoreConfig,
    // Resolved database file; the lock only guards lazy initialization.
    path: RwLock<Option<PathBuf>>,
    created: RwLock<HashSet<String>>,
    retention: RwLock<Duration>,
    counters: CounterAdapter,
}

impl SqlSeriesStore {
    /// Create a store; nothing touches the disk until first use
    pub fn new(config: SqlStoreConfig) -> Result<Self> {
        if config.name.trim().is_empty() {
            return Err(SeriesError::invalid("store name cannot be blank"));
        }
        Ok(Self {
            name: format!("{}{}", config.name, crate::config::FILE_EXTENSION),
            config,
            path: RwLock::new(None),
            created: RwLock::new(HashSet::new()),
            retention: RwLock::new(crate::config::DEFAULT_RETENTION),
            counters: CounterAdapter::new(),
        })
    }

    /// Open a store named `name` inside `data_dir`
    pub fn open(data_dir: impl Into<PathBuf>, name: &str) -> Result<Self> {
        Self::new(SqlStoreConfig {
            data_dir: data_dir.into(),
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// Resolve the database file, creating its directory on first call
    pub fn initialize(&self) -> Result<PathBuf> {
        if let Some(path) = self.path.read().as_ref() {
            return Ok(path.clone());
        }
        let mut path = self.path.write();
        if let Some(path) = path.as_ref() {
            return Ok(path.clone());
        }
        std::fs::create_dir_all(&self.config.data_dir)?;
        let file = self.config.data_dir.join(&self.name);
        if !file.exists() {
            info!("Create database {}", file.display());
        }
        *path = Some(file.clone());
        Ok(file)
    }

    /// Path of the database file, once initialized
    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    fn open_connection(&self, path: &Path) -> Result<Connection> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let context = || format!("Failed to open store '{}'", self.name);
        let conn = Connection::open_with_flags(path, flags)
            .map_err(|e| SeriesError::storage(context(), e))?;
        conn.busy_timeout(self.config.busy_timeout)
            .map_err(|e| SeriesError::storage(context(), e))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| SeriesError::storage(context(), e))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| SeriesError::storage(context(), e))?;
        Ok(conn)
    }

    /// Run `f` on the thread's bound connection, or on a fresh one
    fn in_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let path = self.initialize()?;
        if let Some(conn) = bound_connection(&path) {
            return f(&conn);
        }
        let conn = self.open_connection(&path)?;
        f(&conn)
    }

    /// Bind one connection to this thread for the duration of `f` and commit
    /// everything `f` does in a single transaction
    fn in_transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let path = self.initialize()?;
        if bound_connection(&path).is_some() {
            return f();
        }
        let conn = Rc::new(self.open_connection(&path)?);
        // IMMEDIATE takes the write lock up front so concurrent batches wait
        // on the busy timeout instead of failing on a stale read snapshot.
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| SeriesError::storage(format!("Failed to begin transaction, store '{}'", self.name), e))?;
        let guard = BoundGuard::bind(path, Rc::clone(&conn));
        let value = f()?;
        drop(guard);
        tx.commit()
            .map_err(|e| SeriesError::storage(format!("Failed to commit transaction, store '{}'", self.name), e))?;
        Ok(value)
    }

    fn ensure_table(&self, conn: &Connection, metric: &Metric) -> Result<()> {
        let table = metric.id();
        if self.created.read().contains(table) {
            return Ok(());
        }
        match create_table(conn, table) {
            TableCreation::Created => debug!("Created table '{}' in store '{}'", table, self.name),
            TableCreation::AlreadyExists => {}
            TableCreation::Failed(e) => {
                return Err(SeriesError::storage(
                    format!(
                        "Failed to create storage for metric '{}', store '{}'",
                        metric.name(),
                        self.name
                    ),
                    e,
                ))
            }
        }
        // Inside a transaction the table only exists once it commits.
        if conn.is_autocommit() {
            self.created.write().insert(table.to_string());
        }
        Ok(())
    }

    fn read_series(&self, metric: &Metric, range: Option<TimeRange>) -> Result<DefaultSeries> {
        let values = self
            .in_connection(|conn| {
                self.ensure_table(conn, metric)?;
                let rows = match range {
                    Some(range) => query_values(
                        conn,
                        &format!(
                            "SELECT * FROM \"{}\" WHERE timestamp BETWEEN ?1 AND ?2",
                            metric.id()
                        ),
                        params![range.start_or_min(), range.end_or_max()],
                    ),
                    None => query_values(conn, &format!("SELECT * FROM \"{}\"", metric.id()), params![]),
                };
                rows.map_err(|e| self.failure("extract series", metric, e))
            })?;
        Ok(DefaultSeries::from_values(metric.display_name(), values).with_retention(self.retention()))
    }

    fn query_timestamp(&self, metric: &Metric, function: &str) -> Result<Option<Timestamp>> {
        self.in_connection(|conn| {
            self.ensure_table(conn, metric)?;
            timestamp_of(conn, metric.id(), function)
                .map_err(|e| self.failure("extract earliest or latest timestamp", metric, e))
        })
    }

    /// Adapt and store one raw sample; counter baselines are only staged
    fn write(
        &self,
        conn: &Connection,
        metric: &Metric,
        value: Value,
        staged: &mut StagedBaselines,
    ) -> Result<()> {
        self.ensure_table(conn, metric)?;
        match self.counters.stage(metric, value, staged) {
            Some(value) => self.insert(conn, metric, value),
            None => Ok(()),
        }
    }

    fn insert(&self, conn: &Connection, metric: &Metric, value: Value) -> Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO \"{}\" (timestamp, value) VALUES (?1, ?2)",
            metric.id()
        );
        conn.prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(params![value.timestamp, value.as_f64()]))
            .map_err(|e| {
                SeriesError::storage(
                    format!(
                        "Failed to store value '{}' for metric '{}', store '{}'",
                        value,
                        metric.name(),
                        self.name
                    ),
                    e,
                )
            })?;
        Ok(())
    }

    fn failure(&self, action: &str, metric: &Metric, source: rusqlite::Error) -> SeriesError {
        SeriesError::storage(
            format!(
                "Failed to {} for metric '{}', store '{}'",
                action,
                metric.name(),
                self.name
            ),
            source,
        )
    }

    fn table_names(&self, conn: &Connection) -> Result<Vec<String>> {
        table_names(conn).map_err(|e| {
            SeriesError::storage(format!("Failed to list tables, store '{}'", self.name), e)
        })
    }
}

impl SeriesStore for SqlSeriesStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn retention(&self) -> Duration {
        *self.retention.read()
    }

    fn set_retention(&self, retention: Duration) {
        *self.retention.write() = retention;
    }

    fn metrics(&self) -> Result<Vec<Metric>> {
        let tables = self.in_connection(|conn| self.table_names(conn))?;
        let mut metrics = Vec::with_capacity(tables.len());
        for table in tables {
            metrics.push(Metric::get(&table)?.as_ref().clone());
        }
        metrics.sort();
        Ok(metrics)
    }

    fn earliest_timestamp(&self) -> Result<Option<Timestamp>> {
        self.in_connection(|conn| {
            let mut earliest = None;
            for table in self.table_names(conn)? {
                let timestamp = timestamp_of(conn, &table, "MIN").map_err(|e| {
                    SeriesError::storage(
                        format!("Failed to extract earliest timestamp, store '{}'", self.name),
                        e,
                    )
                })?;
                earliest = min_option(earliest, timestamp);
            }
            Ok(earliest)
        })
    }

    fn earliest_timestamp_of(&self, metric: &Metric) -> Result<Option<Timestamp>> {
        self.query_timestamp(metric, "MIN")
    }

    fn latest_timestamp_of(&self, metric: &Metric) -> Result<Option<Timestamp>> {
        self.query_timestamp(metric, "MAX")
    }

    fn get(&self, metric: &Metric) -> Result<Arc<DefaultSeries>> {
        Ok(Arc::new(self.read_series(metric, None)?))
    }

    fn get_range(&self, metric: &Metric, range: TimeRange) -> Result<DefaultSeries> {
        self.read_series(metric, Some(range))
    }

    fn average_range(&self, metric: &Metric, range: TimeRange) -> Result<Option<f64>> {
        self.in_connection(|conn| {
            self.ensure_table(conn, metric)?;
            let sql = format!(
                "SELECT AVG(value) FROM \"{}\" WHERE timestamp BETWEEN ?1 AND ?2",
                metric.id()
            );
            conn.query_row(&sql, params![range.start_or_min(), range.end_or_max()], |row| {
                row.get::<_, Option<f64>>(0)
            })
            .map_err(|e| self.failure("extract average", metric, e))
        })
    }

    fn add(&self, metric: &Metric, value: Value) -> Result<()> {
        let mut staged = StagedBaselines::default();
        self.in_connection(|conn| self.write(conn, metric, value, &mut staged))?;
        self.counters.commit(staged);
        Ok(())
    }

    fn add_batch(&self, batch: &Batch) -> Result<()> {
        // Baselines move only once the whole batch has committed.
        let staged = self
            .in_transaction(|| {
                self.in_connection(|conn| {
                    let mut staged = StagedBaselines::default();
                    for (metric, value) in batch.iter() {
                        self.write(conn, metric, value, &mut staged)?;
                    }
                    Ok(staged)
                })
            })
            .map_err(|e| match e {
                SeriesError::Storage { context, source } => SeriesError::Storage {
                    context: format!("{} (batch of {} metrics)", context, batch.len()),
                    source,
                },
                other => other,
            })?;
        self.counters.commit(staged);
        Ok(())
    }

    fn append(&self, metric: &Metric, values: &[Value]) -> Result<()> {
        self.in_transaction(|| {
            self.in_connection(|conn| {
                self.ensure_table(conn, metric)?;
                for value in values {
                    self.insert(conn, metric, *value)?;
                }
                Ok(())
            })
        })
    }

    fn clear(&self) -> Result<()> {
        self.in_transaction(|| {
            self.in_connection(|conn| {
                for table in self.table_names(conn)? {
                    conn.execute(&format!("DELETE FROM \"{}\"", table), [])
                        .map_err(|e| {
                            SeriesError::storage(
                                format!("Failed to clear table '{}', store '{}'", table, self.name),
                                e,
                            )
                        })?;
                }
                Ok(())
            })
        })
    }
}

/// Restores the thread's previous binding when dropped, so transactions of
/// different stores can nest on one thread
struct BoundGuard {
    previous: Option<(PathBuf, Rc<Connection>)>,
}

impl BoundGuard {
    fn bind(path: PathBuf, conn: Rc<Connection>) -> Self {
        let previous = BOUND.with(|bound| bound.borrow_mut().replace((path, conn)));
        BoundGuard { previous }
    }
}

impl Drop for BoundGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        BOUND.with(|bound| *bound.borrow_mut() = previous);
    }
}

fn bound_connection(path: &Path) -> Option<Rc<Connection>> {
    BOUND.with(|bound| {
        bound
            .borrow()
            .as_ref()
            .filter(|(bound_path, _)| bound_path == path)
            .map(|(_, conn)| Rc::clone(conn))
    })
}

fn create_table(conn: &Connection, table: &str) -> TableCreation {
    let sql = format!(
        "CREATE TABLE \"{}\" (\n  timestamp INTEGER PRIMARY KEY ASC,\n  value REAL\n) WITHOUT ROWID",
        table
    );
    match conn.execute_batch(&sql) {
        Ok(()) => TableCreation::Created,
        Err(e) if is_already_exists(&e) => TableCreation::AlreadyExists,
        Err(e) => TableCreation::Failed(e),
    }
}

fn is_already_exists(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(_, Some(message)) if message.contains("already exists")
    )
}

fn query_values(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, |row| {
        Ok(Value::new(row.get::<_, i64>(0)?, row.get::<_, f64>(1)? as f32))
    })?;
    rows.collect()
}

fn timestamp_of(conn: &Connection, table: &str, function: &str) -> rusqlite::Result<Option<Timestamp>> {
    let sql = format!("SELECT {}(timestamp) FROM \"{}\"", function, table);
    conn.query_row(&sql, [], |row| row.get::<_, Option<i64>>(0))
        .optional()
        .map(Option::flatten)
}

fn table_names(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
    names.collect()
}
