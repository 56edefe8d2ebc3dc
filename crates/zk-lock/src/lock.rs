//! ZooKeeper distributed mutex implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::instrument;

use zk_lock_core::error::{LockError, LockResult};
use zk_lock_core::timeout::TimeoutValue;
use zk_lock_core::traits::DistributedLock;

use crate::acquire::{AcquireState, AcquisitionEngine, SyncPolicy, WaitArm};
use crate::client::{ZkError, ZooKeeperSession};
use crate::handle::ZooKeeperLockHandle;
use crate::path::ZkPath;

pub(crate) const LOCK_PREFIX: &str = "lock-";

/// Mutex policy: the oldest sibling holds the lock; everyone else waits on
/// the sibling immediately ahead of them.
struct LockPolicy;

#[async_trait]
impl SyncPolicy for LockPolicy {
    fn prefix(&self) -> &'static str {
        LOCK_PREFIX
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
            // Released between the listing and arming the watch.
            (None, _) => Ok(WaitArm::Ready),
        }
    }
}

/// A ZooKeeper-based distributed mutual exclusion lock.
///
/// Acquisition queues an ephemeral sequential `lock-` node under the lock's
/// directory; node creation order fully determines acquisition order.
pub struct ZooKeeperDistributedLock {
    name: String,
    directory: ZkPath,
    engine: AcquisitionEngine,
}

impl ZooKeeperDistributedLock {
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

    /// Like [`acquire`](DistributedLock::acquire), additionally honoring a
    /// cancellation token. Cancellation surfaces as
    /// [`LockError::Cancelled`], always distinct from a timeout.
    #[instrument(skip(self, cancel), fields(lock.path = %self.directory, backend = "zookeeper"))]
    pub async fn acquire_with_cancel(
        &self,
        timeout: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<ZooKeeperLockHandle> {
        let timeout_value = TimeoutValue::from(timeout);
        match self
            .engine
            .try_acquire(&self.directory, &LockPolicy, timeout_value, cancel)
            .await?
        {
            Some(handle) => Ok(handle),
            None => Err(LockError::Timeout(timeout.unwrap_or(Duration::ZERO))),
        }
    }
}

impl DistributedLock for ZooKeeperDistributedLock {
    type Handle = ZooKeeperLockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, timeout: Option<Duration>) -> LockResult<Self::Handle> {
        let (_never_cancel, cancel) = watch::channel(false);
        self.acquire_with_cancel(timeout, cancel).await
    }

    #[instrument(skip(self), fields(lock.path = %self.directory, backend = "zookeeper"))]
    async fn try_acquire(&self) -> LockResult<Option<Self::Handle>> {
        let (_never_cancel, cancel) = watch::channel(false);
        self.engine
            .try_acquire(&self.directory, &LockPolicy, TimeoutValue::ZERO, cancel)
            .await
    }
}
