//! Shared helpers for the integration tests.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hunt_shared::transport::{ReliableEndpoint, TransportConfig};
use tokio::task::JoinHandle;

/// Binds a loopback endpoint on an ephemeral port.
pub async fn bind_client(cfg: TransportConfig) -> anyhow::Result<Arc<ReliableEndpoint>> {
    let ep = ReliableEndpoint::bind("127.0.0.1:0".parse()?, cfg).await?;
    Ok(Arc::new(ep))
}

/// Server lines collected by a background task, in arrival order.
pub type Log = Arc<Mutex<Vec<String>>>;

/// Spawns a task that keeps polling `ep` and records every line coming
/// from `server`; lines from other sources are discarded. Abort the
/// handle when the test is done.
pub fn spawn_collector(ep: Arc<ReliableEndpoint>, server: SocketAddr) -> (JoinHandle<()>, Log) {
    let log: Log = Arc::default();
    let sink = Arc::clone(&log);
    let handle = tokio::spawn(async move {
        loop {
            if ep.poll(Duration::from_millis(20)).await.is_err() {
                break;
            }
            while let Some((from, payload)) = ep.try_recv() {
                if from != server {
                    continue;
                }
                sink.lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&payload).into_owned());
            }
        }
    });
    (handle, log)
}

/// Waits until some collected line satisfies `pred`.
pub async fn wait_for_line(
    log: &Log,
    pred: impl Fn(&str) -> bool,
    within: Duration,
) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if log.lock().unwrap().iter().any(|line| pred(line)) {
            return Ok(());
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for a matching line"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Copy of everything collected so far.
pub fn snapshot(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Subscriber setup shared by every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}
