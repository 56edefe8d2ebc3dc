#![allow(dead_code)] // not every test file uses every helper

pub mod sim;

use std::sync::Arc;
use std::time::Duration;

use sim::SimZooKeeper;
use zk_lock::ZooKeeperLockProvider;

/// Builds a provider wired to the simulator with test-friendly timeouts.
pub fn provider(server: &SimZooKeeper) -> ZooKeeperLockProvider {
    provider_with(server, |builder| builder)
}

/// Enables log output for a test run (`RUST_LOG=debug cargo test`).
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a provider wired to the simulator, letting the test adjust the
/// builder first.
pub fn provider_with(
    server: &SimZooKeeper,
    configure: impl FnOnce(
        zk_lock::ZooKeeperLockProviderBuilder,
    ) -> zk_lock::ZooKeeperLockProviderBuilder,
) -> ZooKeeperLockProvider {
    let builder = ZooKeeperLockProvider::builder()
        .connection_string("sim:2181")
        .connect_timeout(Duration::from_secs(5))
        .session_timeout(Duration::from_secs(5))
        .connector(Arc::new(server.connector()));
    configure(builder)
        .build()
        .unwrap_or_else(|e| panic!("failed to build test provider: {e}"))
}
