//! Units of work: one SQLite transaction per operation, bounded by an
//! optional deadline.

use std::time::{Duration, Instant};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::error::{DynaError, DynaResult};

/// Number of VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

/// Whether a unit of work writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    Read,
    Write,
}

impl TxMode {
    fn behavior(self) -> TransactionBehavior {
        match self {
            // take the write lock up front so busy_timeout covers contention
            TxMode::Write => TransactionBehavior::Immediate,
            TxMode::Read => TransactionBehavior::Deferred,
        }
    }
}

/// Point in time after which an operation is abandoned. `Deadline::none()`
/// never expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map(Self::after).unwrap_or_default()
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Fail with `Timeout` if the deadline has passed.
    pub fn check(&self) -> DynaResult<()> {
        if self.expired() {
            Err(DynaError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Run `f` inside a transaction on `conn`. Commits when `f` succeeds;
/// every other exit rolls back when the transaction is dropped.
pub fn run_unit_of_work<T, F>(
    conn: &mut Connection,
    mode: TxMode,
    deadline: Deadline,
    f: F,
) -> DynaResult<T>
where
    F: FnOnce(&Transaction<'_>) -> DynaResult<T>,
{
    deadline.check()?;

    if let Some(at) = deadline.instant() {
        conn.progress_handler(PROGRESS_INTERVAL, Some(move || Instant::now() >= at));
    }

    let result = execute(conn, mode, deadline, f);

    if deadline.instant().is_some() {
        conn.progress_handler(0, None::<fn() -> bool>);
    }

    result.map_err(|err| {
        let err = if deadline.expired() { DynaError::Timeout } else { err };
        if err.is_caller_error() {
            debug!(error = %err, "unit of work rolled back");
        } else {
            warn!(error = %err, kind = err.kind(), "unit of work rolled back");
        }
        err
    })
}

fn execute<T, F>(conn: &mut Connection, mode: TxMode, deadline: Deadline, f: F) -> DynaResult<T>
where
    F: FnOnce(&Transaction<'_>) -> DynaResult<T>,
{
    let tx = conn.transaction_with_behavior(mode.behavior())?;
    let output = f(&tx)?;
    deadline.check()?;
    tx.commit()?;
    Ok(output)
}
