//! Versioned schema migration for a single connection.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};

use crate::error::{Error, Result};

/// Versions before and after a migration run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationOutcome {
    pub from: usize,
    pub to: usize,
}

impl MigrationOutcome {
    pub fn applied(&self) -> bool {
        self.to > self.from
    }
}

/// Apply every step at index >= the recorded version, then advance the
/// counter to `steps.len()`. All of it runs in one immediate transaction:
/// a failing step rolls back the earlier steps and leaves the counter alone.
pub fn migrate(conn: &mut Connection, steps: &[&str]) -> Result<MigrationOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch("CREATE TABLE IF NOT EXISTS migrations (version INTEGER NOT NULL)")?;

    let recorded: Option<i64> = tx
        .query_row("SELECT version FROM migrations LIMIT 1", [], |row| row.get(0))
        .optional()?;
    let current = match recorded {
        Some(version) => version.max(0) as usize,
        None => {
            tx.execute("INSERT INTO migrations (version) VALUES (0)", [])?;
            0
        }
    };

    if current > steps.len() {
        tracing::warn!(
            recorded = current,
            known = steps.len(),
            "Schema is newer than this build, skipping migrations"
        );
        tx.commit()?;
        return Ok(MigrationOutcome { from: current, to: current });
    }

    for (version, step) in steps.iter().enumerate().skip(current) {
        tx.execute_batch(step)
            .map_err(|source| Error::Migration { version, source })?;
    }

    if current < steps.len() {
        tx.execute("UPDATE migrations SET version = ?", [steps.len() as i64])?;
    }
    tx.commit()?;

    Ok(MigrationOutcome { from: current, to: steps.len() })
}

/// Currently recorded schema version, or 0 for an unmigrated database.
pub fn current_version(conn: &Connection) -> Result<usize> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'migrations'",
            [],
            |_| Ok(true),
        )
        .optional()?
        .unwrap_or(false);
    if !exists {
        return Ok(0);
    }
    let version: Option<i64> = conn
        .query_row("SELECT version FROM migrations LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(version.unwrap_or(0).max(0) as usize)
}
