//! ZooKeeper backend for distributed locks.
//!
//! Provides distributed mutexes, reader-writer locks, and counting
//! semaphores coordinated purely through a hierarchical coordination
//! service's ephemeral sequential nodes and watches - no lock manager beyond
//! the service itself.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use zk_lock::ZooKeeperLockProvider;
//! use zk_lock_core::prelude::*;
//!
//! # async fn example(connector: Arc<dyn zk_lock::client::ZooKeeperConnector>)
//! # -> Result<(), Box<dyn std::error::Error>> {
//! let provider = ZooKeeperLockProvider::builder()
//!     .connection_string("zk1:2181,zk2:2181")
//!     .connector(connector)
//!     .build()?;
//!
//! // Create a lock by name
//! let lock = provider.create_lock("my-resource");
//!
//! // Acquire with a timeout
//! let handle = lock.acquire(Some(Duration::from_secs(5))).await?;
//!
//! // Critical section - we have exclusive access
//!
//! handle.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # How it works
//!
//! Acquiring any primitive creates an ephemeral sequential node under the
//! primitive's directory and waits its turn in sibling order: `lock-` nodes
//! acquire when oldest, `read-`/`write-` nodes share one arrival order with
//! role-dependent predicates, and the first `max_count` `semaphore-` nodes
//! hold tickets (holders carry the `ACQUIRED` data marker). Sessions are
//! pooled and shared across concurrent acquisitions; every handle exposes a
//! lost token that fires if its session expires or its node disappears.

pub mod client;
pub mod handle;
pub mod lock;
pub mod path;
pub mod provider;
pub mod rw_lock;
pub mod semaphore;
pub mod session;

mod acquire;
mod sequence;

pub use handle::ZooKeeperLockHandle;
pub use lock::ZooKeeperDistributedLock;
pub use path::ZkPath;
pub use provider::{ZooKeeperLockProvider, ZooKeeperLockProviderBuilder};
pub use rw_lock::ZooKeeperDistributedReaderWriterLock;
pub use semaphore::ZooKeeperDistributedSemaphore;
pub use session::{ConnectionKey, SessionPool};
