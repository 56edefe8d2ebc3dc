//! Pooled coordination-service sessions.
//!
//! Connecting to the service is expensive relative to a single lock
//! operation, so sessions are cached per [`ConnectionKey`] and shared across
//! concurrent acquisitions. Each cache entry is reference counted; the pool
//! itself holds one internal reference that it gives up once the session has
//! lived past its max age (or is lost), so an idle session is eventually
//! closed while a busy one stays available.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::{Mutex, watch};
use tracing::debug;

use zk_lock_core::error::LockResult;

use crate::client::{AuthInfo, ZkError, ZooKeeperConnector, ZooKeeperSession};

/// Cache key for pooled sessions.
///
/// Equality is structural, including the order of auth entries: two
/// configurations listing the same credentials in a different order get
/// distinct sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub connection_string: String,
    pub connect_timeout: Duration,
    pub session_timeout: Duration,
    pub auth: Vec<AuthInfo>,
}

type SessionResult = Result<Arc<dyn ZooKeeperSession>, ZkError>;
type ConnectFuture = Shared<BoxFuture<'static, SessionResult>>;

struct PoolEntry {
    connect: ConnectFuture,
    ref_count: usize,
}

/// Reference-counted cache of live sessions.
pub struct SessionPool {
    connector: Arc<dyn ZooKeeperConnector>,
    max_age: Duration,
    entries: Mutex<HashMap<ConnectionKey, PoolEntry>>,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn ZooKeeperConnector>, max_age: Duration) -> Self {
        Self {
            connector,
            max_age,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Borrows a session for `key`, connecting if none is cached.
    ///
    /// Concurrent callers with the same key share a single in-flight connect
    /// attempt. Connection establishment is bounded by the key's connect
    /// timeout; on failure the cache entry is removed and the error
    /// propagates to every waiting caller.
    pub async fn acquire(self: &Arc<Self>, key: &ConnectionKey) -> LockResult<PooledSession> {
        let (connect, is_new) = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.ref_count += 1;
                    (entry.connect.clone(), false)
                }
                None => {
                    let connect = self.start_connect(key);
                    // One reference for the caller, one internal hold that
                    // keeps the session cached until max age elapses.
                    entries.insert(
                        key.clone(),
                        PoolEntry {
                            connect: connect.clone(),
                            ref_count: 2,
                        },
                    );
                    (connect, true)
                }
            }
        };

        if is_new {
            self.spawn_idle_hold(key.clone(), connect.clone());
        }

        // The caller's reference has already been counted; if this future is
        // dropped at the await below, the guard returns it so the entry can
        // still reach zero and be evicted.
        let mut guard = RefGuard {
            pool: Arc::clone(self),
            key: Some(key.clone()),
        };

        match connect.await {
            Ok(session) => {
                guard.disarm();
                Ok(PooledSession {
                    pool: Arc::clone(self),
                    key: key.clone(),
                    session,
                    released: AtomicBool::new(false),
                })
            }
            Err(err) => {
                guard.disarm();
                self.release_key(key).await;
                Err(err.into())
            }
        }
    }

    fn start_connect(&self, key: &ConnectionKey) -> ConnectFuture {
        let connector = Arc::clone(&self.connector);
        let key = key.clone();
        async move {
            let connect_timeout = key.connect_timeout;
            match tokio::time::timeout(
                connect_timeout,
                connector.connect(&key.connection_string, key.session_timeout, &key.auth),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ZkError::ConnectTimeout(connect_timeout)),
            }
        }
        .boxed()
        .shared()
    }

    /// Holds the pool's internal reference until the session ages out or is
    /// lost, whichever comes first. User references keep the entry alive
    /// past that point; the age timer only stops the pool itself from
    /// pinning an idle session forever.
    fn spawn_idle_hold(self: &Arc<Self>, key: ConnectionKey, connect: ConnectFuture) {
        let pool = Arc::clone(self);
        let max_age = self.max_age;
        tokio::spawn(async move {
            if let Ok(session) = connect.await {
                let mut lost = session.lost();
                tokio::select! {
                    _ = tokio::time::sleep(max_age) => {
                        debug!(connection = %key.connection_string, "pooled session aged out");
                    }
                    _ = lost.wait_for(|lost| *lost) => {
                        debug!(connection = %key.connection_string, "pooled session lost");
                    }
                }
            }
            pool.release_key(&key).await;
        });
    }

    /// Drops one reference to `key`; the last reference removes the entry
    /// and closes the underlying session in the background.
    async fn release_key(self: &Arc<Self>, key: &ConnectionKey) {
        let removed = {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(key) {
                Some(entry) => {
                    entry.ref_count -= 1;
                    if entry.ref_count == 0 {
                        entries.remove(key)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        // Teardown happens outside the pool lock and never blocks the
        // releasing caller.
        if let Some(entry) = removed {
            if let Some(Ok(session)) = entry.connect.now_or_never() {
                tokio::spawn(async move {
                    session.close().await;
                });
            }
        }
    }

}

/// Returns a counted pool reference if no [`PooledSession`] has taken
/// ownership of it by the time the guard drops.
struct RefGuard {
    pool: Arc<SessionPool>,
    key: Option<ConnectionKey>,
}

impl RefGuard {
    fn disarm(&mut self) {
        self.key = None;
    }
}

impl Drop for RefGuard {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let pool = Arc::clone(&self.pool);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    pool.release_key(&key).await;
                });
            }
        }
    }
}

/// One borrowed reference to a pooled session.
///
/// Dropping the guard returns the reference in the background; call
/// [`release`](PooledSession::release) to return it promptly. Both are
/// idempotent.
pub struct PooledSession {
    pool: Arc<SessionPool>,
    key: ConnectionKey,
    session: Arc<dyn ZooKeeperSession>,
    released: AtomicBool,
}

impl PooledSession {
    pub fn session(&self) -> &Arc<dyn ZooKeeperSession> {
        &self.session
    }

    /// Receiver that flips to `true` when the underlying session is lost.
    pub fn lost(&self) -> watch::Receiver<bool> {
        self.session.lost()
    }

    /// Returns this reference to the pool.
    pub async fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.pool.release_key(&self.key).await;
        }
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            let pool = Arc::clone(&self.pool);
            let key = self.key.clone();
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    pool.release_key(&key).await;
                });
            }
        }
    }
}
