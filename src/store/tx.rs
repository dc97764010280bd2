//! Write transaction bounded by a wall-clock deadline.

use std::time::{Duration, Instant};

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use tracing::warn;

use crate::names::NameConfig;

use super::{StoreError, StoreResult, dialect::Dialect, sql::Tables};

/// An immediate transaction that refuses to write or commit once its
/// deadline has passed. Dropping it uncommitted rolls back.
pub struct DeadlineTx<'c> {
    tx: Transaction<'c>,
    started: Instant,
    timeout: Duration,
}

impl<'c> DeadlineTx<'c> {
    /// Begins the transaction with a deadline counted from `started`.
    ///
    /// SQLite's lock wait is capped at the time left, and running out of it
    /// while waiting surfaces as [`StoreError::TransactionTimeout`].
    pub fn begin(conn: &'c mut Connection, started: Instant, timeout: Duration) -> StoreResult<Self> {
        conn.busy_timeout(timeout.saturating_sub(started.elapsed()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|err| match err {
                rusqlite::Error::SqliteFailure(ref e, _) if e.code == ErrorCode::DatabaseBusy => {
                    timed_out(timeout)
                }
                other => StoreError::from(other),
            })?;
        Ok(Self {
            tx,
            started,
            timeout,
        })
    }

    pub fn check(&self) -> StoreResult<()> {
        if self.started.elapsed() >= self.timeout {
            return Err(timed_out(self.timeout));
        }
        Ok(())
    }

    /// The open transaction, for domain writes that must commit with the
    /// events.
    pub fn connection(&self) -> &Connection {
        &self.tx
    }

    pub fn tables<'a>(&'a self, names: &'a NameConfig, dialect: &'a dyn Dialect) -> Tables<'a> {
        Tables::new(&self.tx, names, dialect)
    }

    pub fn commit(self) -> StoreResult<()> {
        if let Err(err) = self.check() {
            warn!(
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "transaction deadline exceeded, rolling back"
            );
            self.tx.rollback()?;
            return Err(err);
        }
        self.tx.commit()?;
        Ok(())
    }
}

fn timed_out(timeout: Duration) -> StoreError {
    StoreError::TransactionTimeout {
        timeout_ms: timeout.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_counts_from_before_begin() {
        let mut conn = Connection::open_in_memory().expect("open");
        let started = Instant::now() - Duration::from_millis(50);
        let tx = DeadlineTx::begin(&mut conn, started, Duration::from_millis(20)).expect("begin");
        assert!(matches!(tx.check(), Err(StoreError::TransactionTimeout { timeout_ms: 20 })));
        assert!(tx.commit().is_err());
    }

    #[test]
    fn lock_wait_is_capped_by_the_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("locked.db");
        let holder = Connection::open(&path).expect("holder");
        holder.execute_batch("BEGIN IMMEDIATE").expect("hold write lock");

        let mut conn = Connection::open(&path).expect("open");
        let started = Instant::now();
        let err = DeadlineTx::begin(&mut conn, started, Duration::from_millis(100))
            .err()
            .expect("lock held elsewhere");
        assert!(matches!(err, StoreError::TransactionTimeout { timeout_ms: 100 }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
