//! Integration tests for lock-coordinated ledger startup.
//!
//! Workers race to start the same ledger. Only one of them may run the
//! instance factory; everyone else must end up with the persisted config.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swap_harness::ledgers::lifecycle::{read_persisted_config, CONFIG_FILE_NAME, PID_FILE_NAME};
use swap_harness::ledgers::{LedgerInstance, LedgerLifecycleManager};
use swap_harness::lock::RetryPolicy;
use swap_harness::Result;
use tempfile::TempDir;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct NodeConfig {
    rpc_port: u16,
}

/// A node that takes a while to start and is "run" by the test process.
struct SlowNode {
    port: u16,
    started: bool,
    stops: Arc<AtomicUsize>,
    start_delay: Duration,
    owner_pid: u32,
}

impl SlowNode {
    fn new(port: u16, stops: Arc<AtomicUsize>) -> Self {
        Self {
            port,
            started: false,
            stops,
            start_delay: Duration::from_millis(200),
            owner_pid: std::process::id(),
        }
    }
}

#[async_trait]
impl LedgerInstance for SlowNode {
    type Config = NodeConfig;

    fn name(&self) -> &str {
        "slow-node"
    }

    async fn start(&mut self) -> Result<()> {
        tokio::time::sleep(self.start_delay).await;
        self.started = true;
        Ok(())
    }

    async fn warm_up(&mut self) -> Result<NodeConfig> {
        Ok(NodeConfig {
            rpc_port: self.port,
        })
    }

    fn pid(&self) -> Option<u32> {
        // alive for the whole test
        self.started.then_some(self.owner_pid)
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn manager() -> LedgerLifecycleManager {
    LedgerLifecycleManager::new(
        RetryPolicy::ledger()
            .with_retries(100)
            .with_delays(Duration::from_millis(10), Duration::from_millis(50)),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_runs_factory_once() {
    let dir = TempDir::new().unwrap();
    let factory_calls = Arc::new(AtomicUsize::new(0));
    let stops = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..5u16)
        .map(|worker| {
            let lock_dir = dir.path().join("node");
            let factory_calls = factory_calls.clone();
            let stops = stops.clone();
            tokio::spawn(async move {
                manager()
                    .start(&lock_dir, || {
                        factory_calls.fetch_add(1, Ordering::SeqCst);
                        Ok(SlowNode::new(18_000 + worker, stops))
                    })
                    .await
            })
        })
        .collect();

    let mut handles = Vec::new();
    for worker in workers {
        handles.push(worker.await.unwrap().unwrap());
    }

    assert_eq!(factory_calls.load(Ordering::SeqCst), 1);
    assert_eq!(handles.iter().filter(|h| h.is_owner()).count(), 1);

    let first = handles[0].config().clone();
    assert!(handles.iter().all(|h| h.config() == &first));

    let persisted: NodeConfig = read_persisted_config(&dir.path().join("node"))
        .unwrap()
        .unwrap();
    assert_eq!(persisted, first);
}

#[tokio::test]
async fn test_reused_handle_stop_leaves_node_running() {
    let dir = TempDir::new().unwrap();
    let lock_dir = dir.path().join("node");
    let stops = Arc::new(AtomicUsize::new(0));

    let mut owner = manager()
        .start(&lock_dir, || Ok(SlowNode::new(18_443, stops.clone())))
        .await
        .unwrap();
    let mut reused = manager()
        .start(&lock_dir, || -> Result<SlowNode> {
            panic!("a persisted config must be reused")
        })
        .await
        .unwrap();

    assert!(owner.is_owner());
    assert!(!reused.is_owner());
    assert_eq!(reused.pid(), None);

    reused.stop().await;
    assert_eq!(stops.load(Ordering::SeqCst), 0);
    assert!(lock_dir.join(CONFIG_FILE_NAME).exists());

    owner.stop().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(!lock_dir.join(CONFIG_FILE_NAME).exists());
    assert!(!lock_dir.join(PID_FILE_NAME).exists());
}

/// Set in the re-executed test binary that plays the first worker.
const LOCK_HOLDER_DIR_ENV: &str = "SWAP_HARNESS_TEST_LOCK_HOLDER_DIR";

/// Written by the lock holder once its factory runs under the lock.
const HOLDING_MARKER: &str = "holding";

/// Start a slow node from a separate process. The node "runs" as this
/// process's parent so the persisted pid outlives the holder.
async fn hold_lock_and_start(lock_dir: &Path) {
    let handle = manager()
        .start(lock_dir, || {
            std::fs::write(lock_dir.join(HOLDING_MARKER), b"")?;
            let mut node = SlowNode::new(19_001, Arc::new(AtomicUsize::new(0)));
            node.start_delay = Duration::from_millis(1_500);
            node.owner_pid = std::os::unix::process::parent_id();
            Ok(node)
        })
        .await
        .unwrap();
    assert!(handle.is_owner());
    // the parent test owns the node from here on
    std::mem::forget(handle);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_process_waits_for_lock_and_reuses_config() {
    if let Some(dir) = std::env::var_os(LOCK_HOLDER_DIR_ENV) {
        hold_lock_and_start(&PathBuf::from(dir)).await;
        return;
    }

    let dir = TempDir::new().unwrap();
    let lock_dir = dir.path().join("node");
    std::fs::create_dir_all(&lock_dir).unwrap();

    let mut holder = Command::new(std::env::current_exe().unwrap())
        .args([
            "--exact",
            "test_second_process_waits_for_lock_and_reuses_config",
            "--nocapture",
        ])
        .env(LOCK_HOLDER_DIR_ENV, &lock_dir)
        .spawn()
        .unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while !lock_dir.join(HOLDING_MARKER).exists() {
        assert!(std::time::Instant::now() < deadline, "holder never took the lock");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // the holder is still starting its node
    assert!(!lock_dir.join(CONFIG_FILE_NAME).exists());

    let factory_calls = AtomicUsize::new(0);
    let reused = manager()
        .start(&lock_dir, || {
            factory_calls.fetch_add(1, Ordering::SeqCst);
            Ok(SlowNode::new(19_002, Arc::new(AtomicUsize::new(0))))
        })
        .await
        .unwrap();

    let status = tokio::task::spawn_blocking(move || holder.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(status.success());

    assert_eq!(factory_calls.load(Ordering::SeqCst), 0);
    assert!(!reused.is_owner());
    assert_eq!(reused.config(), &NodeConfig { rpc_port: 19_001 });
    assert_eq!(
        std::fs::read_to_string(lock_dir.join(PID_FILE_NAME)).unwrap(),
        std::process::id().to_string()
    );
}
