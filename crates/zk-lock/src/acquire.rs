//! Generic "queue for a turn" acquisition protocol.
//!
//! Every primitive follows the same shape: create an ephemeral sequential
//! node under the target directory, order the siblings, ask the primitive's
//! policy whether this node has acquired, and if not let the policy arm a
//! single watch and wait for it before re-checking. The policy supplies the
//! node prefix, the acquisition predicate, and the wait strategy; everything
//! else - directory creation, the wraparound-safe ordering, timeout and
//! cancellation racing, cleanup - lives here.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use zk_lock_core::error::{LockError, LockResult};
use zk_lock_core::timeout::TimeoutValue;

use crate::client::{Acl, CreateMode, NodeWatch, ZkError, ZooKeeperSession};
use crate::handle::ZooKeeperLockHandle;
use crate::path::ZkPath;
use crate::sequence::{self, SequentialEntry};
use crate::session::{ConnectionKey, PooledSession, SessionPool};

/// Data written to a node once its owner holds a semaphore ticket.
pub(crate) const ACQUIRED_MARKER: &[u8] = b"ACQUIRED";

/// Attempts to create a node under a freshly deleted ancestor chain retry
/// this many times before giving up.
const MAX_CREATE_ATTEMPTS: usize = 10;

/// The ordered siblings observed in one scan, plus the caller's position.
pub(crate) struct AcquireState {
    pub entries: Vec<SequentialEntry>,
    pub own_index: usize,
}

impl AcquireState {
    pub fn preceding(&self) -> &[SequentialEntry] {
        &self.entries[..self.own_index]
    }
}

/// Result of arming a wait.
pub(crate) enum WaitArm {
    /// The wait condition already passed; re-check immediately.
    Ready,
    /// Block until this watch fires.
    Watch(NodeWatch),
}

/// Per-primitive acquisition predicate and wait strategy.
#[async_trait]
pub(crate) trait SyncPolicy: Send + Sync {
    /// Prefix for nodes this policy creates.
    fn prefix(&self) -> &'static str;

    /// Second sibling prefix included in the ordering, if any.
    fn alt_prefix(&self) -> Option<&'static str> {
        None
    }

    /// Whether the node's data is set to [`ACQUIRED_MARKER`] on success, so
    /// queued waiters can watch one node's data instead of the whole set.
    fn writes_acquired_marker(&self) -> bool {
        false
    }

    /// Whether the caller's node has acquired given the current sibling
    /// ordering.
    fn has_acquired(&self, state: &AcquireState) -> bool;

    /// Arms exactly one watch covering the condition the caller is blocked
    /// on, or reports the condition already satisfied.
    async fn arm_wait(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        state: &AcquireState,
    ) -> Result<WaitArm, ZkError>;
}

/// Drives the shared protocol for one configured target.
pub(crate) struct AcquisitionEngine {
    pub pool: Arc<SessionPool>,
    pub key: ConnectionKey,
    pub acl: Vec<Acl>,
}

impl AcquisitionEngine {
    /// Runs one acquisition attempt against `directory`.
    ///
    /// Returns `Ok(None)` when the timeout elapsed without acquisition
    /// (including the zero-timeout non-blocking probe). Cancellation,
    /// session loss, and the caller's own node vanishing surface as errors.
    /// On every non-success path the created node is deleted and the session
    /// reference returned to the pool.
    ///
    /// The deadline starts before the session borrow, so time spent on the
    /// initial connect counts against the caller's timeout. Connection
    /// establishment itself is bounded by the key's connect timeout; an
    /// uncontended target is still grabbed even past the deadline.
    pub async fn try_acquire(
        &self,
        directory: &ZkPath,
        policy: &dyn SyncPolicy,
        timeout: TimeoutValue,
        cancel: watch::Receiver<bool>,
    ) -> LockResult<Option<ZooKeeperLockHandle>> {
        let deadline = timeout.as_duration().map(|d| Instant::now() + d);
        let pooled = self.pool.acquire(&self.key).await?;

        match self
            .acquire_on_session(&pooled, directory, policy, timeout, deadline, cancel)
            .await
        {
            Ok(Some((own_path, owns_directory))) => Ok(Some(ZooKeeperLockHandle::new(
                pooled,
                own_path,
                directory.clone(),
                owns_directory,
            ))),
            Ok(None) => {
                pooled.release().await;
                Ok(None)
            }
            Err(err) => {
                pooled.release().await;
                Err(err)
            }
        }
    }

    /// The protocol proper. Returns the acquired node path and whether this
    /// attempt created the target directory.
    async fn acquire_on_session(
        &self,
        pooled: &PooledSession,
        directory: &ZkPath,
        policy: &dyn SyncPolicy,
        timeout: TimeoutValue,
        deadline: Option<Instant>,
        mut cancel: watch::Receiver<bool>,
    ) -> LockResult<Option<(String, bool)>> {
        let session = pooled.session();
        let mut session_lost = pooled.lost();

        let (own_path, owns_directory) =
            self.create_sequential_node(session, directory, policy.prefix()).await?;

        let result = self
            .wait_loop(
                session,
                &mut session_lost,
                directory,
                policy,
                &own_path,
                timeout,
                deadline,
                &mut cancel,
            )
            .await;

        match result {
            Ok(Some(())) => Ok(Some((own_path, owns_directory))),
            Ok(None) => {
                self.cleanup_node(session, &own_path, directory, owns_directory).await;
                Ok(None)
            }
            Err(err) => {
                // Skip the node delete when the node is already confirmed
                // gone; everything else still gets best-effort cleanup.
                if !matches!(err, LockError::NodeLost(_)) {
                    self.cleanup_node(session, &own_path, directory, owns_directory).await;
                }
                Err(err)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn wait_loop(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        session_lost: &mut watch::Receiver<bool>,
        directory: &ZkPath,
        policy: &dyn SyncPolicy,
        own_path: &str,
        timeout: TimeoutValue,
        deadline: Option<Instant>,
        cancel: &mut watch::Receiver<bool>,
    ) -> LockResult<Option<()>> {
        loop {
            // No watch on the listing itself: arming one here would wake
            // every waiter on every change. The policy arms a single
            // narrower watch below instead.
            let children = match session.get_children(directory.as_str()).await {
                Ok(children) => children,
                Err(ZkError::NoNode) => {
                    // Directory gone implies our ephemeral node is gone too.
                    return Err(node_lost(own_path));
                }
                Err(err) => return Err(err.into()),
            };

            let lookup_session = Arc::clone(session);
            let entries = sequence::filter_and_sort(
                directory.as_str(),
                &children,
                policy.prefix(),
                policy.alt_prefix(),
                move |path: String| {
                    let session = Arc::clone(&lookup_session);
                    async move {
                        session.exists(&path).await.ok().flatten().map(|stat| stat.ctime)
                    }
                },
            )
            .await;

            let own_index = match entries.iter().position(|e| e.path == own_path) {
                Some(index) => index,
                // Our own node vanished while we still expected it to
                // exist: external interference, a hard error.
                None => return Err(node_lost(own_path)),
            };
            let state = AcquireState { entries, own_index };

            if policy.has_acquired(&state) {
                if policy.writes_acquired_marker() {
                    match session.set_data(own_path, ACQUIRED_MARKER, None).await {
                        Ok(_) => {}
                        Err(ZkError::NoNode) => return Err(node_lost(own_path)),
                        Err(err) => return Err(err.into()),
                    }
                }
                debug!(path = own_path, "acquired");
                return Ok(Some(()));
            }

            if timeout.is_zero() {
                return Ok(None);
            }

            let watch = match policy.arm_wait(session, &state).await {
                Ok(WaitArm::Ready) => continue,
                Ok(WaitArm::Watch(watch)) => watch,
                Err(ZkError::NoNode) => continue,
                Err(err) => return Err(err.into()),
            };

            // Race the watch against cancellation, the deadline, and session
            // loss. A closed watch channel (session teardown mid-wait) wakes
            // the loop, which then re-reads state and fails or retries.
            tokio::select! {
                _ = watch => {}
                _ = cancelled(cancel) => return Err(LockError::Cancelled),
                _ = deadline_elapsed(deadline) => return Ok(None),
                _ = session_lost.wait_for(|lost| *lost) => {
                    return Err(LockError::SessionLost(
                        "session lost while waiting for lock".to_string(),
                    ));
                }
            }
        }
    }

    /// Creates the ephemeral sequential node, building missing ancestors as
    /// persistent nodes. A concurrent deletion between the ancestor build
    /// and the node create invalidates the attempt; the whole step retries.
    async fn create_sequential_node(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        directory: &ZkPath,
        prefix: &str,
    ) -> LockResult<(String, bool)> {
        let node_prefix = format!(
            "{}/{prefix}",
            if directory.is_root() { "" } else { directory.as_str() }
        );
        let mut owns_directory = false;

        for _ in 0..MAX_CREATE_ATTEMPTS {
            match session
                .create(&node_prefix, &[], &self.acl, CreateMode::EphemeralSequential)
                .await
            {
                Ok(path) => return Ok((path, owns_directory)),
                Err(ZkError::NoNode) => {
                    owns_directory |= self.create_ancestors(session, directory).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(LockError::Backend(Box::new(ZkError::Client(format!(
            "gave up creating {node_prefix} after repeated ancestor deletions"
        )))))
    }

    /// Creates each missing ancestor of `directory`, returning whether this
    /// call created the directory itself.
    async fn create_ancestors(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        directory: &ZkPath,
    ) -> LockResult<bool> {
        let mut ancestors = Vec::new();
        let mut current = Some(directory.clone());
        while let Some(path) = current {
            if path.is_root() {
                break;
            }
            current = path.parent();
            ancestors.push(path);
        }
        ancestors.reverse();

        let mut created_directory = false;
        for ancestor in &ancestors {
            match session
                .create(ancestor.as_str(), &[], &self.acl, CreateMode::Persistent)
                .await
            {
                Ok(_) => {
                    if ancestor == directory {
                        created_directory = true;
                    }
                }
                Err(ZkError::NodeExists) => {}
                // A parent deleted mid-build; the outer create loop retries.
                Err(ZkError::NoNode) => return Ok(created_directory),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(created_directory)
    }

    /// Best-effort removal of the caller's node, plus the directory when
    /// this attempt created it. The directory delete normally fails with
    /// `NotEmpty` because other waiters still queue under it; that is fine.
    async fn cleanup_node(
        &self,
        session: &Arc<dyn ZooKeeperSession>,
        own_path: &str,
        directory: &ZkPath,
        owns_directory: bool,
    ) {
        match session.delete(own_path, None).await {
            Ok(()) | Err(ZkError::NoNode) => {}
            Err(err) => {
                warn!(path = own_path, %err, "failed to delete lock node during cleanup");
            }
        }

        if owns_directory {
            let session = Arc::clone(session);
            let directory = directory.clone();
            tokio::spawn(async move {
                if let Err(err) = session.delete(directory.as_str(), None).await {
                    debug!(path = %directory, %err, "directory not deleted (still in use)");
                }
            });
        }
    }
}

fn node_lost(own_path: &str) -> LockError {
    error!(path = own_path, "own lock node vanished while still expected to exist");
    LockError::NodeLost(format!("node {own_path} no longer exists"))
}

/// Resolves when the cancellation token fires; never resolves for a token
/// whose sender was dropped without firing.
pub(crate) async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        futures::future::pending::<()>().await;
    }
}

/// Resolves at the deadline; never resolves for an infinite timeout.
async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}
