//! Wire-client seam for the ZooKeeper coordination service.
//!
//! The actual wire protocol client is external to this crate. Locks talk to
//! the service exclusively through [`ZooKeeperSession`], and sessions are
//! manufactured through an injected [`ZooKeeperConnector`]. Any client
//! library (or an in-memory stand-in for tests) can be plugged in by
//! implementing these two traits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

use zk_lock_core::error::LockError;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Deleted automatically when the creating session ends.
    Ephemeral,
    /// Persistent, with a sequence suffix appended by the service.
    PersistentSequential,
    /// Ephemeral, with a sequence suffix appended by the service.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_sequential(self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Subset of a node's stat structure needed by the lock primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    /// Creation time, milliseconds since the epoch.
    pub ctime: i64,
    /// Data version, used for conditional `set_data`/`delete`.
    pub version: i32,
}

/// One entry of an access control list applied to created nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    pub scheme: String,
    pub id: String,
    pub perms: u32,
}

impl Acl {
    pub const PERM_READ: u32 = 1 << 0;
    pub const PERM_WRITE: u32 = 1 << 1;
    pub const PERM_CREATE: u32 = 1 << 2;
    pub const PERM_DELETE: u32 = 1 << 3;
    pub const PERM_ADMIN: u32 = 1 << 4;
    pub const PERM_ALL: u32 =
        Self::PERM_READ | Self::PERM_WRITE | Self::PERM_CREATE | Self::PERM_DELETE | Self::PERM_ADMIN;

    /// The open `world:anyone` entry, the default ACL for created nodes.
    pub fn open_unsafe() -> Self {
        Self {
            scheme: "world".to_string(),
            id: "anyone".to_string(),
            perms: Self::PERM_ALL,
        }
    }
}

/// Credentials added to a session at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AuthInfo {
    pub scheme: String,
    pub auth: Vec<u8>,
}

/// The change that fired a one-shot watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    Created,
    Deleted,
    DataChanged,
    ChildrenChanged,
}

/// A one-shot watch: resolves at most once, on the next matching change.
///
/// A closed sender (session torn down) surfaces as a receive error, which
/// waiters treat the same as a wake-up and re-check state.
pub type NodeWatch = oneshot::Receiver<NodeEvent>;

/// Errors reported by the wire client.
///
/// `Clone` so a failed shared connect future can hand the same error to
/// every caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ZkError {
    #[error("node does not exist")]
    NoNode,
    #[error("node already exists")]
    NodeExists,
    #[error("node has children")]
    NotEmpty,
    #[error("version conflict")]
    BadVersion,
    #[error("session expired")]
    SessionExpired,
    #[error("connection lost")]
    ConnectionLoss,
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("client error: {0}")]
    Client(String),
}

impl From<ZkError> for LockError {
    fn from(err: ZkError) -> Self {
        match err {
            ZkError::SessionExpired | ZkError::ConnectionLoss => {
                LockError::SessionLost(err.to_string())
            }
            ZkError::ConnectTimeout(d) => LockError::ConnectTimeout(d),
            other => LockError::Backend(Box::new(other)),
        }
    }
}

/// One live, heartbeat-maintained connection to the coordination service.
///
/// Watch-arming calls return the current state together with a [`NodeWatch`]
/// that fires on the next change, mirroring the service's exists/getChildren/
/// getData watch semantics. Watches are single-fire and privately owned by
/// the call that armed them.
#[async_trait]
pub trait ZooKeeperSession: Send + Sync {
    /// Creates a node, returning its actual path (with the sequence suffix
    /// appended for sequential modes).
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, ZkError>;

    /// Deletes a node. `version` of `None` matches any version.
    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), ZkError>;

    /// Returns the node's stat, or `None` if it does not exist.
    async fn exists(&self, path: &str) -> Result<Option<NodeStat>, ZkError>;

    /// Like [`exists`](Self::exists), also arming a watch that fires on the
    /// node's next creation, deletion, or data change.
    async fn exists_watch(&self, path: &str) -> Result<(Option<NodeStat>, NodeWatch), ZkError>;

    /// Lists a node's children (names only, not full paths).
    async fn get_children(&self, path: &str) -> Result<Vec<String>, ZkError>;

    /// Like [`get_children`](Self::get_children), also arming a watch that
    /// fires when the child set next changes.
    async fn get_children_watch(&self, path: &str)
    -> Result<(Vec<String>, NodeWatch), ZkError>;

    /// Reads a node's data and stat.
    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat), ZkError>;

    /// Like [`get_data`](Self::get_data), also arming a watch that fires on
    /// the node's next data change or deletion.
    async fn get_data_watch(&self, path: &str)
    -> Result<(Vec<u8>, NodeStat, NodeWatch), ZkError>;

    /// Writes a node's data. `version` of `None` matches any version.
    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<NodeStat, ZkError>;

    /// Receiver that flips to `true` once when the session is lost.
    fn lost(&self) -> watch::Receiver<bool>;

    /// Closes the session, releasing its ephemeral nodes server-side.
    async fn close(&self);
}

/// Factory producing sessions for the pool.
///
/// Implementations wrap a concrete client library; tests inject an in-memory
/// simulator.
#[async_trait]
pub trait ZooKeeperConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        connection_string: &str,
        session_timeout: Duration,
        auth: &[AuthInfo],
    ) -> Result<Arc<dyn ZooKeeperSession>, ZkError>;
}
