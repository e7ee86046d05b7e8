//! Canonical id allocation.
//!
//! Each entity kind has one counter row. An allocation takes the write lock
//! (`BEGIN IMMEDIATE`), reads `last_id`, and writes `last_id + 1` back with a
//! compare-and-swap guard. Busy/locked stores and lost swaps are retried with
//! a jittered backoff, up to the configured attempt count.

use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};

use crate::core::{CoreError, CoreResult};
use crate::ids::{format_id, parse_id, EntityKind};
use crate::store::DocumentStore;

/// Base step of the linear backoff between attempts, in milliseconds.
const BACKOFF_STEP_MS: u64 = 5;

/// Hands out strictly increasing canonical ids.
pub struct SequenceAllocator<'a> {
    store: &'a DocumentStore,
    max_attempts: u32,
}

impl<'a> SequenceAllocator<'a> {
    #[must_use]
    pub const fn new(store: &'a DocumentStore, max_attempts: u32) -> Self {
        Self {
            store,
            max_attempts,
        }
    }

    /// Allocate the next canonical id for `kind`.
    ///
    /// # Errors
    ///
    /// `CoreError::Allocation` when every attempt hit contention. Nothing is
    /// written in that case.
    pub fn allocate(&self, kind: EntityKind) -> CoreResult<String> {
        let n = self.next_value(kind)?;
        Ok(format_id(kind, n))
    }

    /// Advance the counter and return the new raw value.
    ///
    /// # Errors
    ///
    /// Same as [`Self::allocate`].
    pub fn next_value(&self, kind: EntityKind) -> CoreResult<u64> {
        for attempt in 1..=self.max_attempts {
            match self.try_increment(kind) {
                Ok(Some(n)) => {
                    return u64::try_from(n).map_err(|_| {
                        CoreError::Internal(anyhow!(
                            "{} holds an invalid value: {n}",
                            kind.counter_name()
                        ))
                    });
                }
                Ok(None) => {
                    tracing::debug!(%kind, attempt, "counter moved during allocation, retrying");
                }
                Err(err) if is_contention(&err) => {
                    tracing::debug!(%kind, attempt, error = %err, "store busy during allocation, retrying");
                }
                Err(err) => return Err(CoreError::storage(err, "Failed to advance id counter")),
            }
            if attempt < self.max_attempts {
                thread::sleep(backoff(attempt));
            }
        }

        Err(CoreError::Allocation {
            kind,
            attempts: self.max_attempts,
        })
    }

    /// One transactional increment. `Ok(None)` means the swap lost.
    fn try_increment(&self, kind: EntityKind) -> rusqlite::Result<Option<i64>> {
        let name = kind.counter_name();
        let tx = self.store.begin_immediate()?;

        let current: Option<i64> = tx
            .query_row(
                "SELECT last_id FROM counters WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let next = match current {
            None => {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO counters (name, last_id) VALUES (?, 1)",
                    params![name],
                )?;
                if inserted == 0 {
                    return Ok(None);
                }
                1
            }
            Some(last) => {
                let swapped = tx.execute(
                    "UPDATE counters SET last_id = ?1 WHERE name = ?2 AND last_id = ?3",
                    params![last + 1, name, last],
                )?;
                if swapped == 0 {
                    return Ok(None);
                }
                last + 1
            }
        };

        tx.commit()?;
        Ok(Some(next))
    }

    /// Current counter value, 0 if nothing was allocated yet.
    ///
    /// # Errors
    ///
    /// `CoreError::Internal` if the counter row cannot be read.
    pub fn current(&self, kind: EntityKind) -> CoreResult<u64> {
        current_value(self.store.conn(), kind).map_err(CoreError::Internal)
    }

    /// Raise the counter past every canonical id already stored.
    ///
    /// Returns the counter value afterwards.
    ///
    /// # Errors
    ///
    /// `CoreError::Internal` if stored ids or the counter cannot be read or
    /// the raised value cannot be written.
    pub fn reconcile(&self, kind: EntityKind) -> CoreResult<u64> {
        let conn = self.store.conn();
        let floor = highest_stored_suffix(conn, kind).map_err(CoreError::Internal)?;
        let current = current_value(conn, kind).map_err(CoreError::Internal)?;
        if floor <= current {
            return Ok(current);
        }
        raise_counter(conn, kind, floor).map_err(CoreError::Internal)?;
        tracing::info!(%kind, from = current, to = floor, "raised id counter past stored ids");
        Ok(floor)
    }
}

fn is_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// `attempt × step` plus up to one step of random jitter.
fn backoff(attempt: u32) -> Duration {
    let mut byte = [0u8; 1];
    let jitter_ms = if getrandom::fill(&mut byte).is_ok() {
        u64::from(byte[0]) % (BACKOFF_STEP_MS + 1)
    } else {
        0
    };
    Duration::from_millis(BACKOFF_STEP_MS * u64::from(attempt) + jitter_ms)
}

fn current_value(conn: &Connection, kind: EntityKind) -> anyhow::Result<u64> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT last_id FROM counters WHERE name = ?",
            params![kind.counter_name()],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to read id counter")?;
    Ok(value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0))
}

/// Largest numeric suffix among stored canonical ids of `kind`.
pub(crate) fn highest_stored_suffix(conn: &Connection, kind: EntityKind) -> anyhow::Result<u64> {
    let mut stmt = conn
        .prepare("SELECT id FROM documents WHERE is_project = ? AND id LIKE ?")
        .context("Failed to prepare id scan")?;
    let pattern = format!("{}-%", kind.prefix());
    let ids = stmt
        .query_map(params![kind == EntityKind::Project, pattern], |row| {
            row.get::<_, String>(0)
        })
        .context("Failed to scan ids")?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read ids")?;

    Ok(ids
        .iter()
        .filter_map(|id| parse_id(id))
        .filter(|(k, _)| *k == kind)
        .map(|(_, n)| n)
        .max()
        .unwrap_or(0))
}

/// Set the counter to at least `floor` (inside the caller's transaction).
pub(crate) fn raise_counter(conn: &Connection, kind: EntityKind, floor: u64) -> anyhow::Result<()> {
    if floor == 0 {
        return Ok(());
    }
    let floor = i64::try_from(floor).context("Counter floor out of range")?;
    conn.execute(
        "INSERT INTO counters (name, last_id) VALUES (?1, ?2)
         ON CONFLICT (name) DO UPDATE SET last_id = MAX(last_id, excluded.last_id)",
        params![kind.counter_name(), floor],
    )
    .context("Failed to raise id counter")?;
    Ok(())
}
