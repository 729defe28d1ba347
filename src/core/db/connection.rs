//! Connection Management Module
//!
//! A [`Connection`] is a counted alias of one open engine handle. Cloning a
//! connection shares the handle; the handle is closed when the last alias is
//! dropped or disconnected. The database-level transaction belongs to the
//! handle, so every alias sees the same open/closed state.

use super::engine::{EngineResult, RawDb, RawStmt, Step};
use super::registry::{HandleId, Registry};
use crate::core::{Result, Sql3Error};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Commands that move a handle in or out of a database-level transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionCommand {
    Begin,
    Commit,
    Rollback,
}

impl TransactionCommand {
    fn sql(self) -> &'static str {
        match self {
            TransactionCommand::Begin => "BEGIN TRANSACTION",
            TransactionCommand::Commit => "COMMIT TRANSACTION",
            TransactionCommand::Rollback => "ROLLBACK TRANSACTION",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            TransactionCommand::Begin => "begin transaction",
            TransactionCommand::Commit => "commit transaction",
            TransactionCommand::Rollback => "roll back transaction",
        }
    }
}

/// One open engine handle plus the locks that coordinate its users.
///
/// Lives inside an `Arc`; the strong count is the alias count. Dropping the
/// last `Arc` removes the registry entry and closes the engine handle.
pub(crate) struct SharedHandle {
    id: HandleId,
    path: String,
    registry: Arc<Registry>,
    /// Serializes begin/commit/rollback check-and-set on this handle.
    /// Acquired before the registry lock, never the other way round.
    txn_lock: Mutex<()>,
    /// Pairs a step with the changed-row read that belongs to it.
    step_lock: Mutex<()>,
    raw: RawDb,
}

impl SharedHandle {
    fn open(path: &str, registry: Arc<Registry>) -> Result<Self> {
        let raw = RawDb::open(path)
            .map_err(|e| Sql3Error::database(format!("cannot connect to '{}': {}", path, e)))?;
        let id = registry.register(path)?;
        debug!(handle = %id, path, "opened database handle");
        Ok(SharedHandle {
            id,
            path: path.to_string(),
            registry,
            txn_lock: Mutex::new(()),
            step_lock: Mutex::new(()),
            raw,
        })
    }

    fn switch_transaction(&self, command: TransactionCommand) -> Result<()> {
        // The mutexes guard no data, so a poisoned one is still usable.
        let _guard = self.txn_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let open = self.registry.in_transaction(self.id)?;

        match command {
            TransactionCommand::Begin if open => return Ok(()),
            TransactionCommand::Begin if !self.raw.is_autocommit() => {
                // Someone issued BEGIN through execute_batch; adopt it.
                self.registry.set_in_transaction(self.id, true)?;
                return Ok(());
            }
            TransactionCommand::Commit | TransactionCommand::Rollback if !open => return Ok(()),
            TransactionCommand::Commit | TransactionCommand::Rollback if self.raw.is_autocommit() => {
                // The engine already ended the transaction on its own,
                // e.g. an error that forced a rollback.
                debug!(handle = %self.id, "transaction already closed by the engine");
                self.registry.set_in_transaction(self.id, false)?;
                return Ok(());
            }
            _ => {}
        }

        self.raw.exec(command.sql()).map_err(|e| {
            Sql3Error::database(format!("failed to {} on '{}': {}", command.verb(), self.path, e))
        })?;
        self.registry
            .set_in_transaction(self.id, command == TransactionCommand::Begin)?;
        debug!(handle = %self.id, "{}", command.sql());
        Ok(())
    }

    pub(crate) fn prepare(&self, sql: &str) -> EngineResult<RawStmt> {
        self.raw.prepare(sql)
    }

    /// Steps `stmt` once and reads the changed-row count before any other
    /// thread can step a statement on this handle.
    pub(crate) fn step(&self, stmt: &RawStmt) -> EngineResult<(Step, usize)> {
        let _guard = self.step_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let step = stmt.step()?;
        Ok((step, self.raw.changes()))
    }

    pub(crate) fn last_insert_rowid(&self) -> i64 {
        self.raw.last_insert_rowid()
    }
}

impl Drop for SharedHandle {
    fn drop(&mut self) {
        let state = self.registry.unregister(self.id);
        if state.map_or(false, |s| s.in_transaction) {
            debug!(handle = %self.id, "closing handle with an open transaction; the engine rolls it back");
        }
        debug!(handle = %self.id, path = %self.path, "closing database handle");
    }
}

impl fmt::Debug for SharedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// A counted alias of an open database handle.
///
/// `Clone` produces another alias of the same handle. Assigning over a
/// connection (`b = a.clone()`) drops `b`'s previous alias first, closing
/// that handle if `b` was its last user.
#[derive(Debug, Clone)]
pub struct Connection {
    handle: Option<Arc<SharedHandle>>,
    registry: Arc<Registry>,
}

impl Default for Connection {
    fn default() -> Self {
        Connection::new()
    }
}

impl Connection {
    /// Creates an unconnected connection using the global registry.
    pub fn new() -> Self {
        Connection::with_registry(Registry::global())
    }

    /// Creates an unconnected connection whose handles are tracked in
    /// `registry`.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Connection {
            handle: None,
            registry,
        }
    }

    /// Creates a connection and connects it to `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut conn = Connection::new();
        conn.connect(path)?;
        Ok(conn)
    }

    /// Connects to the database at `path`, or `":memory:"`.
    ///
    /// Any handle held so far is released first. The new handle starts with
    /// an alias count of one and no open transaction.
    ///
    /// # Errors
    ///
    /// Returns `Sql3Error::Database` naming the path and the engine
    /// diagnostic when the open fails. The connection is then unconnected.
    pub fn connect<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.disconnect();
        let path = path.as_ref().to_string_lossy();
        let shared = SharedHandle::open(&path, Arc::clone(&self.registry))?;
        self.handle = Some(Arc::new(shared));
        Ok(())
    }

    /// Releases this alias. The handle closes if no other alias remains.
    /// Does nothing when not connected.
    pub fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            debug!(handle = %handle.id, aliases = Arc::strong_count(&handle) - 1, "disconnecting");
        }
    }

    /// `true` while a handle is held.
    pub fn connected(&self) -> bool {
        self.handle.is_some()
    }

    /// Identity of the held handle. Aliases compare equal.
    pub fn connection(&self) -> Option<HandleId> {
        self.handle.as_ref().map(|h| h.id)
    }

    /// Number of live aliases of the held handle, 0 when not connected.
    pub fn ref_count(&self) -> usize {
        self.handle.as_ref().map_or(0, Arc::strong_count)
    }

    /// Path the held handle was opened with.
    pub fn path(&self) -> Option<&str> {
        self.handle.as_ref().map(|h| h.path.as_str())
    }

    /// The registry tracking this connection's handles.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Whether the handle has a database-level transaction open.
    pub fn in_transaction(&self) -> Result<bool> {
        let handle = self.shared()?;
        self.registry.in_transaction(handle.id)
    }

    pub(crate) fn shared(&self) -> Result<&Arc<SharedHandle>> {
        self.handle
            .as_ref()
            .ok_or_else(|| Sql3Error::database("connection is not connected"))
    }

    /// Opens a database-level transaction unless one is already open on
    /// this handle.
    ///
    /// The engine rejects a nested `BEGIN`, so the shared flag is checked and
    /// set atomically with respect to other threads using the handle.
    pub fn begin_transaction(&self) -> Result<()> {
        self.shared()?.switch_transaction(TransactionCommand::Begin)
    }

    /// Commits the open transaction, if any.
    pub fn end_transaction(&self) -> Result<()> {
        self.shared()?.switch_transaction(TransactionCommand::Commit)
    }

    /// Rolls back the open transaction, if any.
    pub fn rollback_transaction(&self) -> Result<()> {
        self.shared()?.switch_transaction(TransactionCommand::Rollback)
    }

    /// Runs one or more semicolon-separated statements without result rows,
    /// e.g. DDL or pragmas. Not retried on busy.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let handle = self.shared()?;
        handle
            .raw
            .exec(sql)
            .map_err(|e| Sql3Error::database(format!("failed to execute '{}': {}", sql, e)))
    }
}
