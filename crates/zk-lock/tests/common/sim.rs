//! In-memory stand-in for the coordination service.
//!
//! Implements the `ZooKeeperSession`/`ZooKeeperConnector` seam over a flat
//! node tree with per-parent sequence counters, one-shot watches, and
//! expirable sessions, so the lock protocol can be exercised hermetically.
//! Counters are seedable to drive tests across the 32-bit wrap point.

#![allow(dead_code)] // not every test file uses every helper
#![allow(clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use zk_lock::client::{
    Acl, AuthInfo, CreateMode, NodeEvent, NodeStat, NodeWatch, ZkError, ZooKeeperConnector,
    ZooKeeperSession,
};

#[derive(Debug)]
struct SimNode {
    data: Vec<u8>,
    ctime: i64,
    version: i32,
    ephemeral_owner: Option<u64>,
    next_sequence: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchKind {
    Exists,
    Data,
    Children,
}

struct SimWatch {
    path: String,
    kind: WatchKind,
    tx: oneshot::Sender<NodeEvent>,
}

struct SimState {
    nodes: BTreeMap<String, SimNode>,
    watches: Vec<SimWatch>,
    clock: i64,
    next_session_id: u64,
    sessions: HashMap<u64, watch::Sender<bool>>,
    connect_count: usize,
    connect_delay: Option<Duration>,
    children_queries: usize,
}

impl SimState {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            SimNode {
                data: Vec::new(),
                ctime: 0,
                version: 0,
                ephemeral_owner: None,
                next_sequence: 0,
            },
        );
        Self {
            nodes,
            watches: Vec::new(),
            clock: 1,
            next_session_id: 1,
            sessions: HashMap::new(),
            connect_count: 0,
            connect_delay: None,
            children_queries: 0,
        }
    }

    fn stat_of(&self, path: &str) -> Option<NodeStat> {
        self.nodes.get(path).map(|n| NodeStat {
            ctime: n.ctime,
            version: n.version,
        })
    }

    fn child_names(&self, parent: &str) -> Vec<String> {
        let prefix = if parent == "/" {
            "/".to_string()
        } else {
            format!("{parent}/")
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn fire_watches(&mut self, path: &str, kind: WatchKind, event: NodeEvent) {
        let mut kept = Vec::with_capacity(self.watches.len());
        for w in self.watches.drain(..) {
            if w.path == path && w.kind == kind {
                let _ = w.tx.send(event);
            } else {
                kept.push(w);
            }
        }
        self.watches = kept;
    }

    fn arm_watch(&mut self, path: &str, kind: WatchKind) -> NodeWatch {
        let (tx, rx) = oneshot::channel();
        self.watches.push(SimWatch {
            path: path.to_string(),
            kind,
            tx,
        });
        rx
    }

    fn parent_of(path: &str) -> Option<(&str, &str)> {
        if path == "/" {
            return None;
        }
        let idx = path.rfind('/')?;
        let parent = if idx == 0 { "/" } else { &path[..idx] };
        Some((parent, &path[idx + 1..]))
    }

    fn remove_node(&mut self, path: &str) {
        self.nodes.remove(path);
        self.fire_watches(path, WatchKind::Exists, NodeEvent::Deleted);
        self.fire_watches(path, WatchKind::Data, NodeEvent::Deleted);
        if let Some((parent, _)) = Self::parent_of(path) {
            let parent = parent.to_string();
            self.fire_watches(&parent, WatchKind::Children, NodeEvent::ChildrenChanged);
        }
    }

    fn expire_session(&mut self, session_id: u64) {
        if let Some(lost_tx) = self.sessions.remove(&session_id) {
            let _ = lost_tx.send(true);
        }
        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.ephemeral_owner == Some(session_id))
            .map(|(k, _)| k.clone())
            .collect();
        for path in owned {
            self.remove_node(&path);
        }
    }
}

/// Handle to the simulated server, shared by sessions and tests.
#[derive(Clone)]
pub struct SimZooKeeper {
    state: Arc<Mutex<SimState>>,
}

impl SimZooKeeper {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    pub fn connector(&self) -> SimConnector {
        SimConnector {
            state: Arc::clone(&self.state),
        }
    }

    /// Creates a persistent node directly, parents included.
    pub fn create_dir(&self, path: &str) {
        let mut state = self.state.lock().unwrap();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut current = String::new();
        for segment in segments {
            current.push('/');
            current.push_str(segment);
            if !state.nodes.contains_key(&current) {
                let ctime = state.clock;
                state.clock += 1;
                state.nodes.insert(
                    current.clone(),
                    SimNode {
                        data: Vec::new(),
                        ctime,
                        version: 0,
                        ephemeral_owner: None,
                        next_sequence: 0,
                    },
                );
            }
        }
    }

    /// Seeds the sequence counter of `path` so the next sequential child
    /// gets `value`.
    pub fn seed_sequence(&self, path: &str, value: i32) {
        let mut state = self.state.lock().unwrap();
        if let Some(node) = state.nodes.get_mut(path) {
            node.next_sequence = value;
        }
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().nodes.contains_key(path)
    }

    pub fn node_data(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().nodes.get(path).map(|n| n.data.clone())
    }

    pub fn children_of(&self, path: &str) -> Vec<String> {
        self.state.lock().unwrap().child_names(path)
    }

    /// Deletes a node out from under its owner, as external interference.
    pub fn delete_node(&self, path: &str) {
        self.state.lock().unwrap().remove_node(path);
    }

    pub fn expire_all_sessions(&self) {
        let mut state = self.state.lock().unwrap();
        let ids: Vec<u64> = state.sessions.keys().copied().collect();
        for id in ids {
            state.expire_session(id);
        }
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().unwrap().connect_count
    }

    /// Delays every subsequent connect attempt, for connect-timeout tests.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = Some(delay);
    }

    /// How many child listings sessions have issued; a blocked waiter should
    /// barely move this.
    pub fn children_query_count(&self) -> usize {
        self.state.lock().unwrap().children_queries
    }
}

impl Default for SimZooKeeper {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SimConnector {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl ZooKeeperConnector for SimConnector {
    async fn connect(
        &self,
        _connection_string: &str,
        _session_timeout: Duration,
        _auth: &[AuthInfo],
    ) -> Result<Arc<dyn ZooKeeperSession>, ZkError> {
        let delay = self.state.lock().unwrap().connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let (session_id, lost_rx) = {
            let mut state = self.state.lock().unwrap();
            state.connect_count += 1;
            let session_id = state.next_session_id;
            state.next_session_id += 1;
            let (lost_tx, lost_rx) = watch::channel(false);
            state.sessions.insert(session_id, lost_tx);
            (session_id, lost_rx)
        };
        Ok(Arc::new(SimSession {
            state: Arc::clone(&self.state),
            session_id,
            lost_rx,
        }))
    }
}

pub struct SimSession {
    state: Arc<Mutex<SimState>>,
    session_id: u64,
    lost_rx: watch::Receiver<bool>,
}

impl SimSession {
    fn check_alive(&self, state: &SimState) -> Result<(), ZkError> {
        if state.sessions.contains_key(&self.session_id) {
            Ok(())
        } else {
            Err(ZkError::SessionExpired)
        }
    }
}

#[async_trait]
impl ZooKeeperSession for SimSession {
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        _acl: &[Acl],
        mode: CreateMode,
    ) -> Result<String, ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;

        let (parent, base) = SimState::parent_of(path)
            .ok_or_else(|| ZkError::Client("cannot create the root".to_string()))?;
        let parent = parent.to_string();
        let base = base.to_string();
        if !state.nodes.contains_key(&parent) {
            return Err(ZkError::NoNode);
        }

        let actual_path = if mode.is_sequential() {
            let sequence = {
                let parent_node = state
                    .nodes
                    .get_mut(&parent)
                    .ok_or(ZkError::NoNode)?;
                let sequence = parent_node.next_sequence;
                parent_node.next_sequence = sequence.wrapping_add(1);
                sequence
            };
            let suffix = if sequence < 0 {
                format!("-{:010}", -i64::from(sequence))
            } else {
                format!("{sequence:010}")
            };
            if parent == "/" {
                format!("/{base}{suffix}")
            } else {
                format!("{parent}/{base}{suffix}")
            }
        } else {
            if state.nodes.contains_key(path) {
                return Err(ZkError::NodeExists);
            }
            path.to_string()
        };

        let ephemeral_owner = matches!(
            mode,
            CreateMode::Ephemeral | CreateMode::EphemeralSequential
        )
        .then_some(self.session_id);

        let ctime = state.clock;
        state.clock += 1;
        state.nodes.insert(
            actual_path.clone(),
            SimNode {
                data: data.to_vec(),
                ctime,
                version: 0,
                ephemeral_owner,
                next_sequence: 0,
            },
        );
        state.fire_watches(&actual_path, WatchKind::Exists, NodeEvent::Created);
        state.fire_watches(&parent, WatchKind::Children, NodeEvent::ChildrenChanged);
        Ok(actual_path)
    }

    async fn delete(&self, path: &str, version: Option<i32>) -> Result<(), ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        let node = state.nodes.get(path).ok_or(ZkError::NoNode)?;
        if let Some(v) = version {
            if v != node.version {
                return Err(ZkError::BadVersion);
            }
        }
        if !state.child_names(path).is_empty() {
            return Err(ZkError::NotEmpty);
        }
        state.remove_node(path);
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<Option<NodeStat>, ZkError> {
        let state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        Ok(state.stat_of(path))
    }

    async fn exists_watch(&self, path: &str) -> Result<(Option<NodeStat>, NodeWatch), ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        let stat = state.stat_of(path);
        let rx = state.arm_watch(path, WatchKind::Exists);
        Ok((stat, rx))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>, ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        state.children_queries += 1;
        if !state.nodes.contains_key(path) {
            return Err(ZkError::NoNode);
        }
        Ok(state.child_names(path))
    }

    async fn get_children_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, NodeWatch), ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        state.children_queries += 1;
        if !state.nodes.contains_key(path) {
            return Err(ZkError::NoNode);
        }
        let children = state.child_names(path);
        let rx = state.arm_watch(path, WatchKind::Children);
        Ok((children, rx))
    }

    async fn get_data(&self, path: &str) -> Result<(Vec<u8>, NodeStat), ZkError> {
        let state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        let node = state.nodes.get(path).ok_or(ZkError::NoNode)?;
        Ok((
            node.data.clone(),
            NodeStat {
                ctime: node.ctime,
                version: node.version,
            },
        ))
    }

    async fn get_data_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, NodeStat, NodeWatch), ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        let (data, stat) = {
            let node = state.nodes.get(path).ok_or(ZkError::NoNode)?;
            (
                node.data.clone(),
                NodeStat {
                    ctime: node.ctime,
                    version: node.version,
                },
            )
        };
        let rx = state.arm_watch(path, WatchKind::Data);
        Ok((data, stat, rx))
    }

    async fn set_data(
        &self,
        path: &str,
        data: &[u8],
        version: Option<i32>,
    ) -> Result<NodeStat, ZkError> {
        let mut state = self.state.lock().unwrap();
        self.check_alive(&state)?;
        let new_stat = {
            let node = state.nodes.get_mut(path).ok_or(ZkError::NoNode)?;
            if let Some(v) = version {
                if v != node.version {
                    return Err(ZkError::BadVersion);
                }
            }
            node.data = data.to_vec();
            node.version += 1;
            NodeStat {
                ctime: node.ctime,
                version: node.version,
            }
        };
        state.fire_watches(path, WatchKind::Data, NodeEvent::DataChanged);
        state.fire_watches(path, WatchKind::Exists, NodeEvent::DataChanged);
        Ok(new_stat)
    }

    fn lost(&self) -> watch::Receiver<bool> {
        self.lost_rx.clone()
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.expire_session(self.session_id);
    }
}
