//! ZooKeeper distributed semaphore implementation.
//!
//! The first `max_count` nodes in sibling order hold tickets. To keep watch
//! fan-out down under contention, only the next candidate (position
//! `max_count`) watches the full children set; nodes further back watch the
//! data of the node immediately ahead of them and rely on the `ACQUIRED`
//! marker that ticket holders write, so they can tell "still queued" from
//! "advanced to a ticket" without re-scanning every sibling.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::instrument;

use zk_lock_core::error::{LockError, LockResult};
use zk_lock_core::timeout::TimeoutValue;
use zk_lock_core::traits::DistributedSemaphore;

use crate::acquire::{ACQUIRED_MARKER, AcquireState, AcquisitionEngine, SyncPolicy, WaitArm};
use crate::client::{ZkError, ZooKeeperSession};
use crate::handle::ZooKeeperLockHandle;
use crate::path::ZkPath;
use crate::sequence;

pub(crate) const SEMAPHORE_PREFIX: &str = "semaphore-";

struct SemaphorePolicy {
    max_count: usize,
    directory: ZkPath,
}

#[async_trait]
impl SyncPolicy for SemaphorePolicy {
    fn prefix(&self) -> &'static str {
        SEMAPHORE_PREFIX
    }

    fn writes_acquired_marker(&self) -> bool {
        true
    }

    fn has_acquired(&self, state: &AcquireState) -> bool {
        state.own_index < self.max_count
    }

    async fn arm_wait(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        state: &AcquireState,
    ) -> Result<WaitArm, ZkError> {
        if state.own_index == self.max_count {
            // Next candidate: any of several holders ahead might release,
            // so only the full children set covers the wait condition.
            let (children, children_watch) =
                session.get_children_watch(self.directory.as_str()).await?;
            let mut current: Vec<&str> = state.entries.iter().map(|e| e.name.as_str()).collect();
            // Filter with the same suffix parse as the listing above, so a
            // malformed sibling cannot make the sets permanently unequal.
            let mut observed: Vec<&str> = children
                .iter()
                .map(|n| n.as_str())
                .filter(|n| sequence::is_sequential_name(n, SEMAPHORE_PREFIX))
                .collect();
            current.sort_unstable();
            observed.sort_unstable();
            if current != observed {
                return Ok(WaitArm::Ready);
            }
            Ok(WaitArm::Watch(children_watch))
        } else {
            // Queued further back: one watch on the predecessor's data.
            let predecessor = &state.entries[state.own_index - 1];
            match session.get_data_watch(&predecessor.path).await {
                Ok((data, _, data_watch)) => {
                    if data == ACQUIRED_MARKER {
                        // Predecessor already advanced to a ticket.
                        Ok(WaitArm::Ready)
                    } else {
                        Ok(WaitArm::Watch(data_watch))
                    }
                }
                Err(ZkError::NoNode) => Ok(WaitArm::Ready),
                Err(err) => Err(err),
            }
        }
    }
}

/// A ZooKeeper-based distributed counting semaphore.
///
/// `max_count` is not validated against other callers of the same name:
/// semaphores opened with different counts against one name behave
/// unpredictably (but mostly sensibly) once contention exceeds the smaller
/// count. This mirrors the documented behavior of the node-ordering scheme
/// and is not treated as an error.
pub struct ZooKeeperDistributedSemaphore {
    name: String,
    directory: ZkPath,
    max_count: u32,
    engine: AcquisitionEngine,
}

impl ZooKeeperDistributedSemaphore {
    pub(crate) fn new(
        name: String,
        directory: ZkPath,
        max_count: u32,
        engine: AcquisitionEngine,
    ) -> Self {
        Self {
            name,
            directory,
            max_count,
            engine,
        }
    }

    /// Directory node the semaphore queues under.
    pub fn path(&self) -> &ZkPath {
        &self.directory
    }

    fn policy(&self) -> SemaphorePolicy {
        SemaphorePolicy {
            max_count: self.max_count as usize,
            directory: self.directory.clone(),
        }
    }

    fn check_max_count(&self) -> LockResult<()> {
        if self.max_count == 0 {
            return Err(LockError::InvalidName(
                "semaphore max_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// [`acquire`](DistributedSemaphore::acquire) with a cancellation token.
    #[instrument(skip(self, cancel), fields(lock.path = %self.directory, backend = "zookeeper"))]
    pub async fn acquire_with_cancel(
        &self,
        timeout: Option<Duration>,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<ZooKeeperLockHandle> {
        self.check_max_count()?;
        let timeout_value = TimeoutValue::from(timeout);
        match self
            .engine
            .try_acquire(&self.directory, &self.policy(), timeout_value, cancel)
            .await?
        {
            Some(handle) => Ok(handle),
            None => Err(LockError::Timeout(timeout.unwrap_or(Duration::ZERO))),
        }
    }
}

impl DistributedSemaphore for ZooKeeperDistributedSemaphore {
    type Handle = ZooKeeperLockHandle;

    fn name(&self) -> &str {
        &self.name
    }

    fn max_count(&self) -> u32 {
        self.max_count
    }

    async fn acquire(&self, timeout: Option<Duration>) -> LockResult<Self::Handle> {
        let (_never_cancel, cancel) = watch::channel(false);
        self.acquire_with_cancel(timeout, cancel).await
    }

    #[instrument(skip(self), fields(lock.path = %self.directory, backend = "zookeeper"))]
    async fn try_acquire(&self) -> LockResult<Option<Self::Handle>> {
        self.check_max_count()?;
        let (_never_cancel, cancel) = watch::channel(false);
        self.engine
            .try_acquire(&self.directory, &self.policy(), TimeoutValue::ZERO, cancel)
            .await
    }
}
