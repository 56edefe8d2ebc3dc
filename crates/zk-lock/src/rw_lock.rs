//! ZooKeeper distributed reader-writer lock implementation.
//!
//! Readers and writers create `read-` and `write-` nodes in one shared
//! sibling namespace, so the sequential ordering reflects true arrival order
//! across both roles. A reader is blocked only by writers ahead of it; a
//! writer is blocked by anything ahead of it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::instrument;

use zk_lock_core::error::{LockError, LockResult};
use zk_lock_core::timeout::TimeoutValue;
use zk_lock_core::traits::DistributedReaderWriterLock;

use crate::acquire::{AcquireState, AcquisitionEngine, SyncPolicy, WaitArm};
use crate::client::{ZkError, ZooKeeperSession};
use crate::handle::ZooKeeperLockHandle;
use crate::path::ZkPath;

pub(crate) const READ_PREFIX: &str = "read-";
pub(crate) const WRITE_PREFIX: &str = "write-";

/// Read policy: acquired when no writer-prefixed node precedes this one;
/// otherwise waits on the nearest preceding writer.
struct ReadPolicy;

#[async_trait]
impl SyncPolicy for ReadPolicy {
    fn prefix(&self) -> &'static str {
        READ_PREFIX
    }

    fn alt_prefix(&self) -> Option<&'static str> {
        Some(WRITE_PREFIX)
    }

    fn has_acquired(&self, state: &AcquireState) -> bool {
        state.preceding().iter().all(|e| e.prefix != WRITE_PREFIX)
    }

    async fn arm_wait(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        state: &AcquireState,
    ) -> Result<WaitArm, ZkError> {
        let blocking_writer = state
            .preceding()
            .iter()
            .rev()
            .find(|e| e.prefix == WRITE_PREFIX);
        match blocking_writer {
            Some(writer) => match session.exists_watch(&writer.path).await? {
                (Some(_), node_watch) => Ok(WaitArm::Watch(node_watch)),
                (None, _) => Ok(WaitArm::Ready),
            },
            // The writer disappeared since the listing.
            None => Ok(WaitArm::Ready),
        }
    }
}

/// Write policy: acquired only when first overall; otherwise waits on the
/// immediately preceding node of either role.
struct WritePolicy;

#[async_trait]
impl SyncPolicy for WritePolicy {
    fn prefix(&self) -> &'static str {
        WRITE_PREFIX
    }

    fn alt_prefix(&self) -> Option<&'static str> {
        Some(READ_PREFIX)
    }

    fn has_acquired(&self, state: &AcquireState) -> bool {
        state.own_index == 0
    }

    async fn arm_wait(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        state: &AcquireState,
    ) -> Result<WaitArm, ZkError> {
        let predecessor = &state.entries[state.own_index - 1];
        match session.exists_watch(&predecessor.path).await? {
            (Some(_), node_watch) => Ok(WaitArm::Watch(node_watch)),
            (None, _) => Ok(WaitArm::Ready),
        }
    }
}

/// A ZooKeeper-based distributed reader-writer lock.
///
/// Multiple concurrent readers OR one exclusive writer. A waiting writer
/// blocks readers that queue after it, so writers are not starved.
/// Upgrading a held read lock to a write lock is not supported; release the
/// read lock and acquire a write lock instead.
pub struct ZooKeeperDistributedReaderWriterLock {
    name: String,
    directory: ZkPath,
    engine: AcquisitionEngine,
}

impl ZooKeeperDistributedReaderWriterLock {
    pub(crate) fn new(name: String, directory: ZkPath, engine: AcquisitionEngine) -> Self {
        Self {
            name,
            directory,
            engine,
        }
    }

    /// Directory node the lock queues under.
    pub fn path(&self) -> &ZkPath {
        &self.directory
    }

    /// [`acquire_read`](DistributedReaderWriterLock::acquire_read) with a
    /// cancellation token.
    #[instrument(skip(self, cancel), fields(lock.path = %self.directory, role = "read", backend = "zookeeper"))]
    pub async fn acquire_read_with_cancel(
        &self,
        timeout: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<ZooKeeperLockHandle> {
        self.acquire_with_policy(&ReadPolicy, timeout, cancel).await
    }

    /// [`acquire_write`](DistributedReaderWriterLock::acquire_write) with a
    /// cancellation token.
    #[instrument(skip(self, cancel), fields(lock.path = %self.directory, role = "write", backend = "zookeeper"))]
    pub async fn acquire_write_with_cancel(
        &self,
        timeout: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<ZooKeeperLockHandle> {
        self.acquire_with_policy(&WritePolicy, timeout, cancel).await
    }

    async fn acquire_with_policy(
        &self,
        policy: &dyn SyncPolicy,
        timeout: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<ZooKeeperLockHandle> {
        let timeout_value = TimeoutValue::from(timeout);
        match self
            .engine
            .try_acquire(&self.directory, policy, timeout_value, cancel)
            .await?
        {
            Some(handle) => Ok(handle),
            None => Err(LockError::Timeout(timeout.unwrap_or(Duration::ZERO))),
        }
    }

    async fn try_acquire_with_policy(
        &self,
        policy: &dyn SyncPolicy,
    ) -> LockResult<Option<ZooKeeperLockHandle>> {
        let (_never_cancel, cancel) = watch::channel(false);
        self.engine
            .try_acquire(&self.directory, policy, TimeoutValue::ZERO, cancel)
            .await
    }
}

impl DistributedReaderWriterLock for ZooKeeperDistributedReaderWriterLock {
    type ReadHandle = ZooKeeperLockHandle;
    type WriteHandle = ZooKeeperLockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire_read(&self, timeout: Option<Duration>) -> LockResult<Self::ReadHandle> {
        let (_never_cancel, cancel) = watch::channel(false);
        self.acquire_read_with_cancel(timeout, cancel).await
    }

    #[instrument(skip(self), fields(lock.path = %self.directory, role = "read", backend = "zookeeper"))]
    async fn try_acquire_read(&self) -> LockResult<Option<Self::ReadHandle>> {
        self.try_acquire_with_policy(&ReadPolicy).await
    }

    async fn acquire_write(&self, timeout: Option<Duration>) -> LockResult<Self::WriteHandle> {
        let (_never_cancel, cancel) = watch::channel(false);
        self.acquire_write_with_cancel(timeout, cancel).await
    }

    #[instrument(skip(self), fields(lock.path = %self.directory, role = "write", backend = "zookeeper"))]
    async fn try_acquire_write(&self) -> LockResult<Option<Self::WriteHandle>> {
        self.try_acquire_with_policy(&WritePolicy).await
    }
}
