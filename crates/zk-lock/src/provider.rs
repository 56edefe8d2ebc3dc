//! ZooKeeper lock provider implementation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use zk_lock_core::error::{LockError, LockResult};
use zk_lock_core::traits::{LockProvider, ReaderWriterLockProvider, SemaphoreProvider};

use crate::acquire::AcquisitionEngine;
use crate::client::{Acl, AuthInfo, ZooKeeperConnector};
use crate::lock::ZooKeeperDistributedLock;
use crate::path::ZkPath;
use crate::rw_lock::ZooKeeperDistributedReaderWriterLock;
use crate::semaphore::ZooKeeperDistributedSemaphore;
use crate::session::{ConnectionKey, SessionPool};

/// Default session timeout. Bounds how long the service waits before
/// expiring a session that stops heartbeating: lower values speed up
/// abandonment recovery but raise the risk of false expiry.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(20);

/// Default bound on initial connection establishment.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default maximum age before the pool stops holding an idle session open.
pub const DEFAULT_MAX_SESSION_AGE: Duration = Duration::from_secs(30);

/// Builder for ZooKeeper lock provider configuration.
pub struct ZooKeeperLockProviderBuilder {
    connection_string: String,
    connect_timeout: Duration,
    session_timeout: Duration,
    max_session_age: Duration,
    auth: Vec<AuthInfo>,
    acl: Vec<Acl>,
    directory: String,
    connector: Option<Arc<dyn ZooKeeperConnector>>,
}

impl ZooKeeperLockProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            connection_string: String::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            max_session_age: DEFAULT_MAX_SESSION_AGE,
            auth: Vec::new(),
            acl: Vec::new(),
            directory: "/".to_string(),
            connector: None,
        }
    }

    /// Sets the service connection string (`host:port[,host:port...]`).
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = connection_string.into();
        self
    }

    /// Sets the connect timeout (default 15s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the session timeout (default 20s).
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Sets how long the pool keeps an idle session cached (default 30s).
    pub fn max_session_age(mut self, max_age: Duration) -> Self {
        self.max_session_age = max_age;
        self
    }

    /// Adds credentials applied to every session from this configuration.
    /// May be called repeatedly.
    pub fn add_auth_info(mut self, scheme: impl Into<String>, auth: impl Into<Vec<u8>>) -> Self {
        self.auth.push(AuthInfo {
            scheme: scheme.into(),
            auth: auth.into(),
        });
        self
    }

    /// Adds an access-control entry applied to created nodes. May be called
    /// repeatedly; with no entries, a single open `world:anyone` entry is
    /// used.
    pub fn add_access_control(
        mut self,
        scheme: impl Into<String>,
        id: impl Into<String>,
        perms: u32,
    ) -> Self {
        self.acl.push(Acl {
            scheme: scheme.into(),
            id: id.into(),
            perms,
        });
        self
    }

    /// Sets the directory under which named locks live (default the root).
    pub fn directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Sets the wire client used to open sessions.
    pub fn connector(mut self, connector: Arc<dyn ZooKeeperConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Builds the provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection string is empty, no connector was
    /// supplied, or the directory path is invalid.
    pub fn build(self) -> LockResult<ZooKeeperLockProvider> {
        if self.connection_string.is_empty() {
            return Err(LockError::InvalidName(
                "no connection string provided".to_string(),
            ));
        }
        let connector = self.connector.ok_or_else(|| {
            LockError::InvalidName("no ZooKeeper connector provided".to_string())
        })?;
        let directory = ZkPath::parse(&self.directory)?;

        let acl = if self.acl.is_empty() {
            vec![Acl::open_unsafe()]
        } else {
            self.acl
        };

        Ok(ZooKeeperLockProvider {
            pool: Arc::new(SessionPool::new(connector, self.max_session_age)),
            key: ConnectionKey {
                connection_string: self.connection_string,
                connect_timeout: self.connect_timeout,
                session_timeout: self.session_timeout,
                auth: self.auth,
            },
            acl,
            directory,
        })
    }
}

impl Default for ZooKeeperLockProviderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Provider for ZooKeeper-based distributed locks.
///
/// All primitives created from one provider share a single session pool, so
/// concurrent acquisitions reuse one coordination session instead of each
/// opening their own.
pub struct ZooKeeperLockProvider {
    pool: Arc<SessionPool>,
    key: ConnectionKey,
    acl: Vec<Acl>,
    directory: ZkPath,
}

impl ZooKeeperLockProvider {
    /// Returns a new builder for configuring the provider.
    pub fn builder() -> ZooKeeperLockProviderBuilder {
        ZooKeeperLockProviderBuilder::new()
    }

    fn engine(&self) -> AcquisitionEngine {
        AcquisitionEngine {
            pool: Arc::clone(&self.pool),
            key: self.key.clone(),
            acl: self.acl.clone(),
        }
    }

    /// Creates a lock at an explicit, already-valid node path instead of a
    /// name-derived one.
    pub fn create_lock_at_path(&self, path: &str) -> LockResult<ZooKeeperDistributedLock> {
        let directory = ZkPath::parse(path)?;
        Ok(ZooKeeperDistributedLock::new(
            directory.name().to_string(),
            directory,
            self.engine(),
        ))
    }

    /// Signals the given receiver as a cancellation token pair.
    ///
    /// Convenience for callers of the `*_with_cancel` methods.
    pub fn cancellation_token() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }
}

impl LockProvider for ZooKeeperLockProvider {
    type Lock = ZooKeeperDistributedLock;

    fn create_lock(&self, name: &str) -> Self::Lock {
        ZooKeeperDistributedLock::new(
            name.to_string(),
            self.directory.safe_child(name),
            self.engine(),
        )
    }
}

impl ReaderWriterLockProvider for ZooKeeperLockProvider {
    type Lock = ZooKeeperDistributedReaderWriterLock;

    fn create_reader_writer_lock(&self, name: &str) -> Self::Lock {
        ZooKeeperDistributedReaderWriterLock::new(
            name.to_string(),
            self.directory.safe_child(name),
            self.engine(),
        )
    }
}

impl SemaphoreProvider for ZooKeeperLockProvider {
    type Semaphore = ZooKeeperDistributedSemaphore;

    fn create_semaphore(&self, name: &str, max_count: u32) -> Self::Semaphore {
        ZooKeeperDistributedSemaphore::new(
            name.to_string(),
            self.directory.safe_child(name),
            max_count,
            self.engine(),
        )
    }
}
