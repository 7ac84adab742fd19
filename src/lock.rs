//! Cluster-wide migration lock
//!
//! A run wraps its end-to-end execution in a PostgreSQL session-level
//! advisory lock so two migrations never race against the same database.
//! The lock is keyed by a stable 64-bit hash of a caller-chosen name: two
//! callers with the same name block each other, different names do not
//! interfere.
//!
//! Release must happen on every exit path, success or failure — that is the
//! caller's contract, typically via a scope guard around execution.

use std::time::Duration;

use thiserror::Error;
use tokio_postgres::Client;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("advisory lock '{name}' not acquired within {timeout_ms} ms")]
    Timeout { name: String, timeout_ms: u64 },

    #[error("advisory lock query failed: {0}")]
    Query(#[from] tokio_postgres::Error),
}

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Stable FNV-1a hash of the lock name, reinterpreted as the signed 64-bit
/// key `pg_advisory_lock` expects. Stability across runs and hosts is the
/// point: the same name must map to the same lock forever.
fn lock_key(name: &str) -> i64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in name.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash as i64
}

/// Try to obtain the session-level advisory lock, polling until
/// `timeout_ms` elapses.
pub async fn acquire(client: &Client, name: &str, timeout_ms: u64) -> Result<(), LockError> {
    let key = lock_key(name);
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

    loop {
        let row = client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .await?;
        if row.get::<_, bool>(0) {
            debug!(name, key, "advisory lock acquired");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(LockError::Timeout {
                name: name.to_string(),
                timeout_ms,
            });
        }
        tokio::time::sleep(RETRY_INTERVAL).await;
    }
}

/// Release the lock unconditionally.
pub async fn release(client: &Client, name: &str) -> Result<(), LockError> {
    let key = lock_key(name);
    client
        .execute("SELECT pg_advisory_unlock($1)", &[&key])
        .await?;
    debug!(name, key, "advisory lock released");
    Ok(())
}
