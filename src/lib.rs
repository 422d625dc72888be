//! # fencelock
//!
//! A lease-based distributed lock that needs nothing but a strongly consistent
//! key-value store with conditional writes.
//!
//! Every participant reads the lock record, waits out its lease duration and
//! reads it again. If the record's fencing token did not change in between,
//! nobody is renewing it and the participant may claim it with a conditional
//! update. The winner keeps the lease alive by rewriting the token every
//! heartbeat until it releases.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use fencelock::{LockConfig, LockKey, LockResource, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(SqliteStore::open("fencelock.db", "distributed_locks")?);
//!     let config = LockConfig::new(
//!         Duration::from_millis(1500),
//!         Duration::from_millis(500),
//!         "worker-1",
//!     );
//!     let lock = LockResource::new(store, LockKey::with_sort("testing", "abcde#123456")?, config).await?;
//!
//!     let token = lock.acquire().await?;
//!     println!("holding with fencing token {}", token);
//!     // Do exclusive work here.
//!     lock.release_and_wait().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
mod handle;
pub mod lock;
pub mod models;
mod renewal;
pub mod store;

pub use config::{LockConfig, StoreConfig};
pub use error::{LockError, Result, StoreError};
pub use lock::LockResource;
pub use models::{FencingToken, HoldStatus, LeaseRecord, LockKey};
pub use store::{CreateOutcome, MemoryStore, SqliteStore, Store, UpdateOutcome};
