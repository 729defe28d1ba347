//! Unit of work over a shared connection.
//!
//! A [`Transaction`] drives prepare → bind → execute cycles against its own
//! alias of a [`Connection`]. The first prepare opens the connection's
//! database-level transaction; [`Transaction::finish`] (or dropping the
//! value) commits it, or rolls it back when the unit of work failed.
//!
//! The database-level transaction belongs to the handle, not to the
//! `Transaction` value: every `Transaction` on the same handle works inside
//! the same engine transaction, and finishing any of them ends it for all.

use super::connection::{Connection, SharedHandle};
use super::engine::{RawStmt, Step};
use super::retry::{BusyRetry, Sleeper};
use super::value::Value;
use crate::core::{Result, Sql3Error};
use std::os::raw::c_int;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Nothing prepared yet
    Ready,
    /// A statement is prepared and not positioned on a row
    Prepared,
    /// The last execute produced a row that can be read
    HasOpenResult,
    /// A step failed; only finish or drop are meaningful now
    Errored,
    /// Finished; a new prepare starts another unit of work
    Finished,
}

/// One unit of work against a connection.
///
/// ```no_run
/// use sql3wrap::{Connection, Transaction};
///
/// let conn = Connection::open("songs.db")?;
/// let mut trx = Transaction::new(&conn);
/// trx.prepare("INSERT INTO title (title) VALUES (?)")?
///     .bind("Bohemian Rhapsody")?
///     .execute()?;
/// let id = trx.lastid()?;
/// trx.finish()?;
/// # Ok::<_, sql3wrap::Sql3Error>(())
/// ```
#[derive(Debug)]
pub struct Transaction {
    // Declared before `conn` so the statement finalizes before the alias
    // is released.
    stmt: Option<RawStmt>,
    conn: Connection,
    retry: BusyRetry,
    state: TransactionState,
    pos: c_int,
    affected_rows: usize,
    last_sql: String,
}

impl Transaction {
    /// Creates a unit of work with the default busy policy (5 attempts,
    /// 100 ms apart).
    pub fn new(conn: &Connection) -> Self {
        Transaction::with_retry(conn, BusyRetry::default())
    }

    /// Creates a unit of work with a custom busy policy.
    pub fn with_retry(conn: &Connection, retry: BusyRetry) -> Self {
        Transaction {
            stmt: None,
            conn: conn.clone(),
            retry,
            state: TransactionState::Ready,
            pos: 0,
            affected_rows: 0,
            last_sql: String::new(),
        }
    }

    pub fn set_retries(&mut self, attempts: u32) {
        self.retry.set_attempts(attempts);
    }

    pub fn retries(&self) -> u32 {
        self.retry.attempts()
    }

    /// Sets the wait between busy attempts, in milliseconds.
    pub fn set_retry_wait(&mut self, wait_ms: u64) {
        self.retry.set_wait(Duration::from_millis(wait_ms));
    }

    /// Wait between busy attempts, in milliseconds.
    pub fn retry_wait(&self) -> u64 {
        self.retry.wait().as_millis() as u64
    }

    pub fn set_sleeper(&mut self, sleeper: Arc<dyn Sleeper>) {
        self.retry.set_sleeper(sleeper);
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// SQL text of the most recent successful prepare.
    pub fn last_sql(&self) -> &str {
        &self.last_sql
    }

    /// The connection alias this unit of work runs on.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Returns the handle if this unit of work may still talk to the engine.
    fn usable_handle(&self) -> Result<Arc<SharedHandle>> {
        let handle = self
            .conn
            .shared()
            .map_err(|_| Sql3Error::database("transaction is not connected"))?;
        if self.state == TransactionState::Errored {
            return Err(Sql3Error::database(
                "transaction is in error state, cannot be reused",
            ));
        }
        Ok(Arc::clone(handle))
    }

    /// Marks the unit of work as failed and rolls back the connection's
    /// transaction. Returns the error to hand to the caller.
    fn fail(&mut self, message: String) -> Sql3Error {
        error!(sql = %self.last_sql, "{}", message);
        self.state = TransactionState::Errored;
        self.stmt = None;
        if let Err(e) = self.conn.rollback_transaction() {
            warn!("rollback after failure did not succeed: {}", e);
        }
        Sql3Error::Database(message)
    }

    /// Compiles `sql`, replacing any previously prepared statement.
    ///
    /// Opens the connection's database-level transaction if none is open.
    /// A busy engine is retried per the busy policy.
    ///
    /// # Errors
    ///
    /// Fails immediately when the unit of work is in error state or not
    /// connected. Any other failure rolls back the connection's
    /// transaction and puts this unit of work in error state.
    pub fn prepare(&mut self, sql: &str) -> Result<&mut Self> {
        let handle = self.usable_handle()?;
        if let Err(e) = self.conn.begin_transaction() {
            self.state = TransactionState::Errored;
            return Err(e);
        }

        self.stmt = None;
        match self.retry.run("prepare", || handle.prepare(sql)) {
            Ok(stmt) => {
                self.stmt = Some(stmt);
                self.pos = 0;
                self.last_sql = sql.to_string();
                self.state = TransactionState::Prepared;
                Ok(self)
            }
            Err(e) => Err(self.fail(format!("failed to prepare '{}': {}", sql, e))),
        }
    }

    /// Binds `value` to the next parameter position (starting at 1).
    pub fn bind<V: Into<Value>>(&mut self, value: V) -> Result<&mut Self> {
        let value = value.into();
        self.usable_handle()?;
        let pos = self.pos + 1;
        let bound = match &self.stmt {
            Some(stmt) => stmt.bind(pos, &value),
            None => {
                return Err(Sql3Error::database(format!(
                    "cannot bind {}: no statement prepared",
                    value
                )))
            }
        };
        if let Err(e) = bound {
            return Err(self.fail(format!(
                "failed to bind {} to pos {}: {}, sql {}",
                value, pos, e, self.last_sql
            )));
        }
        self.pos = pos;
        Ok(self)
    }

    /// Steps the prepared statement once.
    ///
    /// Returns `true` when a row is available for the `col*` readers; call
    /// again to advance. Returns `false` when the statement completed; the
    /// statement is then rewound with its bindings cleared, ready for new
    /// binds without another prepare.
    pub fn execute(&mut self) -> Result<bool> {
        let handle = self.usable_handle()?;
        let stmt = self
            .stmt
            .as_ref()
            .ok_or_else(|| Sql3Error::database("cannot execute: no statement prepared"))?;

        match self.retry.run("execute", || handle.step(stmt)) {
            Ok((Step::Row, changes)) => {
                self.affected_rows = changes;
                self.state = TransactionState::HasOpenResult;
                Ok(true)
            }
            Ok((Step::Done, changes)) => {
                self.affected_rows = changes;
                stmt.reset();
                stmt.clear_bindings();
                self.pos = 0;
                self.state = TransactionState::Prepared;
                Ok(false)
            }
            Err(e) => Err(self.fail(format!("execution failure: {}, sql {}", e, self.last_sql))),
        }
    }

    /// Reads column `pos` (0-based) of the current row as an integer.
    ///
    /// Only meaningful after [`execute`](Self::execute) returned `true`.
    pub fn colint(&self, pos: usize) -> i64 {
        self.stmt.as_ref().map_or(0, |s| s.column_i64(pos))
    }

    pub fn coldouble(&self, pos: usize) -> f64 {
        self.stmt.as_ref().map_or(0.0, |s| s.column_f64(pos))
    }

    pub fn colstr(&self, pos: usize) -> String {
        self.stmt
            .as_ref()
            .map_or_else(String::new, |s| s.column_text(pos))
    }

    pub fn is_null(&self, pos: usize) -> bool {
        self.stmt.as_ref().map_or(true, |s| s.is_null(pos))
    }

    pub fn column_count(&self) -> usize {
        self.stmt.as_ref().map_or(0, RawStmt::column_count)
    }

    /// Rows changed by the most recently executed step.
    pub fn affectedrows(&self) -> usize {
        self.affected_rows
    }

    /// Rowid generated by the most recent INSERT on the underlying handle.
    ///
    /// Not thread-safe: the engine keeps this value per handle, not per
    /// statement. An INSERT through another `Transaction` sharing the same
    /// handle, on any thread, overwrites it. Read it right after your own
    /// insert, and do not share the connection with concurrent inserters if
    /// the id matters.
    pub fn lastid(&self) -> Result<i64> {
        let handle = self.usable_handle()?;
        Ok(handle.last_insert_rowid())
    }

    /// Ends the unit of work.
    ///
    /// Rolls back the connection's transaction if this unit of work failed,
    /// commits it otherwise. The prepared statement is released. A finished
    /// unit of work may be reused with a new prepare.
    ///
    /// # Errors
    ///
    /// If the commit or rollback fails the unit of work is left in error
    /// state, so dropping it retries the rollback.
    pub fn finish(&mut self) -> Result<()> {
        if let Some(stmt) = self.stmt.take() {
            stmt.reset();
        }
        let ended = if self.state == TransactionState::Errored {
            self.conn.rollback_transaction()
        } else {
            self.conn.end_transaction()
        };
        match ended {
            Ok(()) => {
                self.state = TransactionState::Finished;
                Ok(())
            }
            Err(e) => {
                self.state = TransactionState::Errored;
                Err(e)
            }
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Finished || !self.conn.connected() {
            return;
        }
        if let Err(e) = self.finish() {
            warn!("failed to finish transaction on drop: {}", e);
        }
    }
}
