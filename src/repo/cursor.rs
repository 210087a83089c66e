use crate::models::error::{BackupError, Result};
use crate::repo::record::Record;
use crate::repo::sqlite::Inner;
use rusqlite::types::Value;
use std::sync::{Arc, Weak};

/// Where a cursor stands inside its result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    BeforeFirst,
    At(usize),
    AfterLast,
}

/// Rows of one executed query, owned by the storage worker.
pub(crate) struct ResultSet {
    columns: Arc<[String]>,
    rows: Vec<Vec<Value>>,
    position: Position,
}

impl ResultSet {
    pub(crate) fn new(columns: Arc<[String]>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            position: Position::BeforeFirst,
        }
    }

    pub(crate) fn columns(&self) -> Arc<[String]> {
        Arc::clone(&self.columns)
    }

    pub(crate) fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn next(&mut self) -> Option<Record> {
        let target = match self.position {
            Position::BeforeFirst => 0,
            Position::At(index) => index + 1,
            Position::AfterLast => return None,
        };
        self.move_to(target)
    }

    pub(crate) fn seek(&mut self, index: usize) -> Option<Record> {
        self.move_to(index)
    }

    pub(crate) fn rewind(&mut self) {
        self.position = Position::BeforeFirst;
    }

    fn move_to(&mut self, index: usize) -> Option<Record> {
        match self.rows.get(index) {
            Some(values) => {
                self.position = Position::At(index);
                Some(Record::new(Arc::clone(&self.columns), values.clone()))
            }
            None => {
                self.position = Position::AfterLast;
                None
            }
        }
    }
}

/// Handle to a result set living on the storage worker.
///
/// Every move is executed on the worker; column access reads the row last
/// moved to. Dropping the cursor releases the rows on the worker.
pub struct QueryCursor {
    storage: Weak<Inner>,
    id: u64,
    columns: Arc<[String]>,
    row_count: usize,
    position: Position,
    current: Option<Record>,
}

impl QueryCursor {
    pub(crate) fn new(storage: Weak<Inner>, id: u64, columns: Arc<[String]>, row_count: usize) -> Self {
        Self {
            storage,
            id,
            columns,
            row_count,
            position: Position::BeforeFirst,
            current: None,
        }
    }

    /// Known from execution time; does not consume rows.
    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn position(&self) -> Position {
        self.position
    }

    /// Advances one row. `None` once the rows are exhausted.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Record>> {
        let (record, position) = self.on_worker(|rows| (rows.next(), rows.position()))?;
        self.settle(record, position)
    }

    /// Jumps to the zero-based row `index`.
    pub fn seek(&mut self, index: usize) -> Result<Option<Record>> {
        let (record, position) = self.on_worker(move |rows| (rows.seek(index), rows.position()))?;
        self.settle(record, position)
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.on_worker(|rows| rows.rewind())?;
        self.position = Position::BeforeFirst;
        self.current = None;
        Ok(())
    }

    pub fn record(&self) -> Option<&Record> {
        self.current.as_ref()
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.current.as_ref().and_then(|record| record.value(index))
    }

    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.current
            .as_ref()
            .and_then(|record| record.value_by_name(name))
    }

    fn settle(&mut self, record: Option<Record>, position: Position) -> Result<Option<Record>> {
        self.position = position;
        self.current = record.clone();
        Ok(record)
    }

    fn on_worker<R, F>(&self, op: F) -> Result<R>
    where
        F: FnOnce(&mut ResultSet) -> R + Send + 'static,
        R: Send + 'static,
    {
        let storage = self.storage.upgrade().ok_or(BackupError::StorageClosed)?;
        let id = self.id;
        storage
            .worker
            .execute_blocking(move |storage| storage.result_set(id).map(op))?
            .ok_or(BackupError::StorageClosed)
    }
}

impl Drop for QueryCursor {
    fn drop(&mut self) {
        if let Some(storage) = self.storage.upgrade() {
            let id = self.id;
            let _ = storage
                .worker
                .execute_nonblocking(move |storage| storage.release_result_set(id));
        }
    }
}
