use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{CreateOutcome, Store, UpdateOutcome};
use crate::{
    config::StoreConfig,
    error::StoreError,
    models::{FencingToken, LeaseRecord, LockKey},
};

pub type DbConn = Arc<Mutex<Connection>>;

/// Lease records kept in a single SQLite table.
///
/// The sort key column uses `''` for "no sort key" so that the composite
/// primary key stays unique (SQLite treats NULLs as distinct). Several
/// processes may open the same database file; SQLite serializes writers, and
/// both conditional writes are single statements, so each one is atomic.
///
/// rusqlite is synchronous, so every statement runs on tokio's blocking pool.
/// A call contending for the database file may wait there for up to the
/// connection's busy timeout.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbConn,
    table: String,
}

impl SqliteStore {
    pub fn open(database_url: &str, table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(database_url)?;
        Self::with_connection(Arc::new(Mutex::new(conn)), table)
    }

    pub fn open_in_memory(table: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(Arc::new(Mutex::new(conn)), table)
    }

    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::open(&config.database_url, &config.table_name)
    }

    pub fn with_connection(db: DbConn, table: &str) -> Result<Self, StoreError> {
        validate_table_name(table)?;
        let store = Self {
            db,
            table: table.to_string(),
        };

        {
            let conn = store.conn()?;
            conn.execute(
                &format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        partition_key TEXT NOT NULL,
                        sort_key TEXT NOT NULL DEFAULT '',
                        fencing_token TEXT NOT NULL,
                        lease_duration_ms INTEGER NOT NULL,
                        owner_name TEXT NOT NULL,
                        updated_at TEXT NOT NULL,
                        PRIMARY KEY (partition_key, sort_key)
                    )
                    "#,
                    store.table
                ),
                [],
            )?;
        }

        info!("Lease table {} initialized", store.table);
        Ok(store)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        lock_conn(&self.db)
    }

    /// Runs `op` on the blocking pool with the connection locked, so a busy
    /// database never stalls a runtime worker.
    async fn with_blocking_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str) -> Result<T, StoreError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let table = self.table.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock_conn(&db)?;
            op(&*conn, table.as_str())
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("sqlite task failed: {}", e)))?
    }
}

fn lock_conn(db: &DbConn) -> Result<MutexGuard<'_, Connection>, StoreError> {
    db.lock()
        .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".to_string()))
}

fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let valid = !table.is_empty()
        && table.len() <= 64
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

fn sort_column(key: &LockKey) -> &str {
    key.sort_key().unwrap_or("")
}

fn corrupt(key: &LockKey, reason: impl ToString) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, key: &LockKey) -> Result<Option<LeaseRecord>, StoreError> {
        let lookup = key.clone();
        let row = self
            .with_blocking_conn(move |conn, table| {
                let row = conn
                    .query_row(
                        &format!(
                            "SELECT fencing_token, lease_duration_ms, owner_name, updated_at FROM {} \
                             WHERE partition_key = ?1 AND sort_key = ?2",
                            table
                        ),
                        params![lookup.partition_key(), sort_column(&lookup)],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, i64>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                            ))
                        },
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;

        let Some((token, lease_duration_ms, owner_name, updated_at)) = row else {
            return Ok(None);
        };

        let fencing_token = FencingToken::parse(&token).map_err(|e| corrupt(key, e))?;
        let lease_duration_ms = u64::try_from(lease_duration_ms)
            .map_err(|_| corrupt(key, format!("negative lease duration {}", lease_duration_ms)))?;
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| corrupt(key, e))?
            .with_timezone(&Utc);

        Ok(Some(LeaseRecord {
            key: key.clone(),
            fencing_token,
            lease_duration_ms,
            owner_name,
            updated_at,
        }))
    }

    async fn create_if_absent(&self, record: &LeaseRecord) -> Result<CreateOutcome, StoreError> {
        let record = record.clone();
        let lease_duration_ms = i64::try_from(record.lease_duration_ms).unwrap_or(i64::MAX);
        let inserted = self
            .with_blocking_conn(move |conn, table| {
                let inserted = conn.execute(
                    &format!(
                        "INSERT INTO {} (partition_key, sort_key, fencing_token, lease_duration_ms, owner_name, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6) ON CONFLICT (partition_key, sort_key) DO NOTHING",
                        table
                    ),
                    params![
                        record.key.partition_key(),
                        sort_column(&record.key),
                        record.fencing_token.to_string(),
                        lease_duration_ms,
                        record.owner_name,
                        record.updated_at.to_rfc3339()
                    ],
                )?;
                Ok(inserted)
            })
            .await?;

        if inserted == 1 {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn update_token_if_matches(
        &self,
        key: &LockKey,
        expected: &FencingToken,
        new: &FencingToken,
        owner_name: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        let target = key.clone();
        let (expected, new) = (*expected, *new);
        let owner_name = owner_name.to_string();
        let updated = self
            .with_blocking_conn(move |conn, table| {
                let updated = conn.execute(
                    &format!(
                        "UPDATE {} SET fencing_token = ?1, owner_name = ?2, updated_at = ?3 \
                         WHERE partition_key = ?4 AND sort_key = ?5 AND fencing_token = ?6",
                        table
                    ),
                    params![
                        new.to_string(),
                        owner_name,
                        Utc::now().to_rfc3339(),
                        target.partition_key(),
                        sort_column(&target),
                        expected.to_string()
                    ],
                )?;
                Ok(updated)
            })
            .await?;

        if updated == 1 {
            Ok(UpdateOutcome::Updated)
        } else {
            debug!("Conditional update rejected for {}", key);
            Ok(UpdateOutcome::ConditionFailed)
        }
    }
}
