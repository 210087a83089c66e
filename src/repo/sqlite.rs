use crate::models::error::{BackupError, Result, StorageError};
use crate::repo::cursor::{QueryCursor, ResultSet};
use crate::repo::record::{describe_value, Record};
use crate::repo::worker::JobThread;
use log::{debug, error, info, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction};
use std::collections::HashMap;
use std::sync::Arc;

pub const SCHEMA_VERSION: &str = "2";

/// Receives every statement failure seen on the storage worker.
pub type StorageErrorHandler = Arc<dyn Fn(&StorageError) + Send + Sync>;

const CREATE_SCHEMA: &str = "BEGIN;
    CREATE TABLE settings(
        key   VARCHAR(64) PRIMARY KEY,
        value TEXT);

    INSERT INTO settings(key, value) VALUES('dbVersion', '2');

    CREATE TABLE backupDirectories(
        id                  INTEGER PRIMARY KEY,
        sourceDir           TEXT,
        remoteDir           TEXT,
        lastFinishedBackup  INTEGER,
        backupInterval      INTEGER,
        keepHistoryDuration INTEGER,
        excludeFilter       TEXT);

    CREATE TABLE files(
        id              INTEGER PRIMARY KEY,
        backupDirectory INTEGER,
        filePath        TEXT,
        lastChecked     INTEGER,
        remoteVersion   INTEGER);

    CREATE TABLE history(
        id               INTEGER PRIMARY KEY,
        backupDirectory  INTEGER,
        remoteFilePath   TEXT,
        originalFilePath TEXT,
        version          INTEGER);

    CREATE INDEX i_files_backupDirectory_filePath ON files (backupDirectory, filePath);
    CREATE INDEX i_files_backupDirectory_lastChecked ON files (backupDirectory, lastChecked);
    CREATE INDEX i_history_backupDirectory_version ON history (backupDirectory, version);
    COMMIT;";

const UPGRADE_FROM_V1: &str = "BEGIN;
    ALTER TABLE backupDirectories ADD COLUMN excludeFilter TEXT;
    CREATE INDEX IF NOT EXISTS i_files_backupDirectory_filePath ON files (backupDirectory, filePath);
    CREATE INDEX IF NOT EXISTS i_files_backupDirectory_lastChecked ON files (backupDirectory, lastChecked);
    CREATE INDEX IF NOT EXISTS i_history_backupDirectory_version ON history (backupDirectory, version);
    UPDATE settings SET value = '2' WHERE key = 'dbVersion';
    COMMIT;";

/// State owned by the storage worker thread. Nothing else touches the connection.
pub(crate) struct Storage {
    conn: Connection,
    result_sets: HashMap<u64, ResultSet>,
    next_result_set: u64,
    on_error: StorageErrorHandler,
}

impl Storage {
    fn report(&self, query: &str, params: &[Value], message: impl ToString) -> StorageError {
        let error = StorageError {
            query: query.to_string(),
            params: params.iter().map(describe_value).collect(),
            message: message.to_string(),
        };
        (self.on_error)(&error);
        error
    }

    fn execute(&self, query: &str, params: &[Value]) -> std::result::Result<usize, StorageError> {
        let result = self
            .conn
            .prepare_cached(query)
            .and_then(|mut statement| statement.execute(params_from_iter(params.iter())));
        result.map_err(|e| self.report(query, params, e))
    }

    fn fetch(&self, query: &str, params: &[Value]) -> std::result::Result<ResultSet, StorageError> {
        fetch_rows(&self.conn, query, params).map_err(|e| self.report(query, params, e))
    }

    pub(crate) fn result_set(&mut self, id: u64) -> Option<&mut ResultSet> {
        self.result_sets.get_mut(&id)
    }

    pub(crate) fn release_result_set(&mut self, id: u64) {
        self.result_sets.remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn open_result_sets(&self) -> usize {
        self.result_sets.len()
    }
}

fn fetch_rows(conn: &Connection, query: &str, params: &[Value]) -> rusqlite::Result<ResultSet> {
    let mut statement = conn.prepare_cached(query)?;
    let columns: Arc<[String]> = statement
        .column_names()
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
        .into();
    let column_count = columns.len();

    let mut rows = statement.query(params_from_iter(params.iter()))?;
    let mut data = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0..column_count {
            values.push(row.get::<_, Value>(index)?);
        }
        data.push(values);
    }

    Ok(ResultSet::new(columns, data))
}

pub(crate) struct Inner {
    pub(crate) worker: JobThread<Storage>,
}

/// Handle to the persisted store. Cloning is cheap; every clone feeds the same worker.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

fn log_storage_error(error: &StorageError) {
    error!("{}", error);
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        Self::open_with_error_handler(path, Arc::new(log_storage_error))
    }

    pub fn open_with_error_handler(path: &str, on_error: StorageErrorHandler) -> Result<Self> {
        let db_path = path.to_string();
        let worker = JobThread::spawn("storage", move || {
            let conn = open_connection(&db_path)?;
            prepare_schema(&conn, &db_path)?;
            Ok::<_, BackupError>(Storage {
                conn,
                result_sets: HashMap::new(),
                next_result_set: 0,
                on_error,
            })
        })?;

        info!("Database ready: {}", path);
        Ok(Self {
            inner: Arc::new(Inner { worker }),
        })
    }

    /// Queues a custom operation on the connection and returns immediately.
    pub fn submit<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&Connection) + Send + 'static,
    {
        self.inner
            .worker
            .execute_nonblocking(move |storage| op(&storage.conn))
    }

    /// Runs a custom operation on the connection and waits for its result.
    pub fn submit_and_wait<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.inner
            .worker
            .execute_blocking(move |storage| op(&storage.conn))
    }

    /// Fire-and-forget statement. Failures only reach the error handler.
    pub fn exec(&self, query: &str, params: Vec<Value>) -> Result<()> {
        let query = query.to_string();
        self.inner.worker.execute_nonblocking(move |storage| {
            let _ = storage.execute(&query, &params);
        })
    }

    /// Returns the number of rows changed.
    pub fn blocking_exec(&self, query: &str, params: Vec<Value>) -> Result<usize> {
        let query = query.to_string();
        Ok(self
            .inner
            .worker
            .execute_blocking(move |storage| storage.execute(&query, &params))??)
    }

    /// Returns the rowid of the inserted row.
    pub fn insert(&self, query: &str, params: Vec<Value>) -> Result<i64> {
        let query = query.to_string();
        Ok(self.inner.worker.execute_blocking(move |storage| {
            storage
                .execute(&query, &params)
                .map(|_| storage.conn.last_insert_rowid())
        })??)
    }

    /// The first row of the result; an empty result is a reported error.
    pub fn select_row(&self, query: &str, params: Vec<Value>) -> Result<Record> {
        let query = query.to_string();
        Ok(self.inner.worker.execute_blocking(move |storage| {
            let mut result_set = storage.fetch(&query, &params)?;
            result_set
                .next()
                .ok_or_else(|| storage.report(&query, &params, "No rows returned (select_row)"))
        })??)
    }

    pub fn select_row_opt(&self, query: &str, params: Vec<Value>) -> Result<Option<Record>> {
        let query = query.to_string();
        Ok(self.inner.worker.execute_blocking(move |storage| {
            storage
                .fetch(&query, &params)
                .map(|mut result_set| result_set.next())
        })??)
    }

    /// First column of the first row.
    pub fn select_value(&self, query: &str, params: Vec<Value>) -> Result<Value> {
        let record = self.select_row(query, params)?;
        Ok(record.value(0).cloned().unwrap_or(Value::Null))
    }

    /// Runs a query and keeps its rows on the worker behind a cursor.
    pub fn select_query(&self, query: &str, params: Vec<Value>) -> Result<QueryCursor> {
        let query = query.to_string();
        let (id, columns, row_count) = self.inner.worker.execute_blocking(move |storage| {
            let result_set = storage.fetch(&query, &params)?;
            let id = storage.next_result_set;
            storage.next_result_set += 1;
            let columns = result_set.columns();
            let row_count = result_set.row_count();
            storage.result_sets.insert(id, result_set);
            Ok::<_, StorageError>((id, columns, row_count))
        })??;

        Ok(QueryCursor::new(
            Arc::downgrade(&self.inner),
            id,
            columns,
            row_count,
        ))
    }

    /// Runs `op` inside one transaction on the worker; any error rolls it back.
    pub fn transaction<R, F>(&self, description: &str, op: F) -> Result<R>
    where
        F: FnOnce(&Transaction) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let description = description.to_string();
        Ok(self.inner.worker.execute_blocking(move |storage| {
            let result = storage.conn.transaction().and_then(|tx| {
                let value = op(&tx)?;
                tx.commit()?;
                Ok(value)
            });
            result.map_err(|e| storage.report(&description, &[], e))
        })??)
    }

    /// Blocks until every operation queued before this call has run.
    pub fn wait_job_done(&self) -> Result<()> {
        self.inner.worker.wait_job_done()
    }

    #[cfg(test)]
    pub(crate) fn open_cursor_count(&self) -> Result<usize> {
        self.inner
            .worker
            .execute_blocking(|storage| storage.open_result_sets())
    }
}

fn open_connection(path: &str) -> Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(path)
    }
    .map_err(|cause| BackupError::DatabaseOpen {
        path: path.to_string(),
        cause,
    })?;

    let journal_mode: String = conn
        .query_row("PRAGMA journal_mode = TRUNCATE", [], |row| row.get(0))
        .map_err(|cause| BackupError::DatabaseOpen {
            path: path.to_string(),
            cause,
        })?;
    debug!("Journal mode for {}: {}", path, journal_mode);

    Ok(conn)
}

fn prepare_schema(conn: &Connection, path: &str) -> Result<()> {
    let open_error = |cause| BackupError::DatabaseOpen {
        path: path.to_string(),
        cause,
    };

    let has_settings: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'settings'",
            [],
            |row| row.get(0),
        )
        .map_err(open_error)?;

    if has_settings == 0 {
        info!("Creating database schema version {}", SCHEMA_VERSION);
        conn.execute_batch(CREATE_SCHEMA).map_err(open_error)?;
        return Ok(());
    }

    let mut version = conn
        .query_row(
            "SELECT value FROM settings WHERE key = 'dbVersion'",
            [],
            |row| row.get::<_, Value>(0),
        )
        .optional()
        .map_err(open_error)?
        .map(|value| describe_value(&value))
        .unwrap_or_default();

    if version == "1" {
        conn.execute_batch(UPGRADE_FROM_V1).map_err(open_error)?;
        warn!("Database upgraded to version {}", SCHEMA_VERSION);
        version = SCHEMA_VERSION.to_string();
    }

    if version != SCHEMA_VERSION {
        return Err(BackupError::UnsupportedSchemaVersion {
            found: version,
            expected: SCHEMA_VERSION.to_string(),
        });
    }

    Ok(())
}
