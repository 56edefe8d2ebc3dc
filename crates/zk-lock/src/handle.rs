//! Handle to a held lock node.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use zk_lock_core::error::LockResult;
use zk_lock_core::traits::LockHandle;

use crate::client::ZkError;
use crate::path::ZkPath;
use crate::session::PooledSession;

/// Handle for a held ZooKeeper lock, read/write lock, or semaphore ticket.
///
/// Owns exactly one ephemeral node and one pooled session reference.
/// Dropping the handle releases both in the background; `release()` does the
/// same with error reporting. Either way the node is deleted and, when this
/// acquisition created the lock directory, the directory delete is attempted
/// opportunistically (it fails harmlessly while other waiters queue there).
pub struct ZooKeeperLockHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    pooled: PooledSession,
    node_path: String,
    directory: ZkPath,
    owns_directory: bool,
    released: AtomicBool,
    lost_tx: watch::Sender<bool>,
    lost_rx: watch::Receiver<bool>,
    monitor_stop: watch::Sender<bool>,
    monitor_started: OnceLock<()>,
}

impl ZooKeeperLockHandle {
    pub(crate) fn new(
        pooled: PooledSession,
        node_path: String,
        directory: ZkPath,
        owns_directory: bool,
    ) -> Self {
        let (lost_tx, lost_rx) = watch::channel(false);
        let (monitor_stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                pooled,
                node_path,
                directory,
                owns_directory,
                released: AtomicBool::new(false),
                lost_tx,
                lost_rx,
                monitor_stop,
                monitor_started: OnceLock::new(),
            }),
        }
    }

    /// Path of the ephemeral node backing this handle.
    pub fn node_path(&self) -> &str {
        &self.inner.node_path
    }

    /// Starts the lock-lost monitor on first access. The monitor links the
    /// session's lost signal with a repeated existence watch on the node
    /// itself, firing the lost token when either reports the node gone.
    fn ensure_monitor(&self) {
        self.inner.monitor_started.get_or_init(|| {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.run_monitor().await;
            });
        });
    }
}

impl HandleInner {
    async fn run_monitor(self: Arc<Self>) {
        let mut session_lost = self.pooled.lost();
        let mut stop = self.monitor_stop.subscribe();

        loop {
            if *stop.borrow() {
                return;
            }
            match self.pooled.session().exists_watch(&self.node_path).await {
                Ok((Some(_), node_watch)) => {
                    tokio::select! {
                        // Fired or closed either way: re-check existence.
                        _ = node_watch => {}
                        _ = session_lost.wait_for(|lost| *lost) => {
                            let _ = self.lost_tx.send(true);
                            return;
                        }
                        _ = stop.wait_for(|stop| *stop) => return,
                    }
                }
                // A release may delete the node between the loop-top stop
                // check and the existence probe; a stopped monitor must not
                // report that as a lost lock.
                Ok((None, _)) => {
                    if !*stop.borrow() {
                        debug!(path = %self.node_path, "lock node gone; firing lost token");
                        let _ = self.lost_tx.send(true);
                    }
                    return;
                }
                Err(_) => {
                    if !*stop.borrow() {
                        let _ = self.lost_tx.send(true);
                    }
                    return;
                }
            }
        }
    }

    /// Idempotent teardown: stop the monitor, delete the node, try the
    /// directory, and always return the session to the pool.
    async fn release_inner(&self) -> LockResult<()> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.monitor_stop.send_replace(true);

        match self.pooled.session().delete(&self.node_path, None).await {
            Ok(()) | Err(ZkError::NoNode) => {}
            Err(err) => {
                warn!(path = %self.node_path, %err, "failed to delete lock node on release");
            }
        }

        if self.owns_directory {
            match self.pooled.session().delete(self.directory.as_str(), None).await {
                Ok(()) | Err(ZkError::NoNode) => {}
                Err(ZkError::NotEmpty) => {} // other waiters still queued
                Err(err) => {
                    debug!(path = %self.directory, %err, "directory not deleted on release");
                }
            }
        }

        self.pooled.release().await;
        Ok(())
    }
}

impl fmt::Debug for ZooKeeperLockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZooKeeperLockHandle")
            .field("node_path", &self.inner.node_path)
            .field("released", &self.inner.released.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl LockHandle for ZooKeeperLockHandle {
    fn lost_token(&self) -> &watch::Receiver<bool> {
        self.ensure_monitor();
        &self.inner.lost_rx
    }

    #[instrument(skip(self), fields(lock.path = %self.inner.node_path, backend = "zookeeper"))]
    async fn release(self) -> LockResult<()> {
        self.inner.release_inner().await
    }
}

impl Drop for ZooKeeperLockHandle {
    fn drop(&mut self) {
        if !self.inner.released.load(Ordering::Acquire) {
            let inner = Arc::clone(&self.inner);
            // Outside a runtime there is nothing to spawn on; the ephemeral
            // node still dies with its session server-side.
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = inner.release_inner().await;
                });
            }
        }
    }
}
