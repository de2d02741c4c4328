//! Shared helpers for the socket-level tests in `tests/`.

use std::time::Duration;

use gcars_server::server::{bind_ephemeral, GameServer};
use gcars_shared::config::EngineConfig;

/// Installs a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Binds a server on an ephemeral port with a short tick.
pub async fn ephemeral_server() -> anyhow::Result<(GameServer, EngineConfig)> {
    let (server, cfg) = bind_ephemeral(5).await?;
    Ok((server, cfg))
}

/// Polls `cond` every few milliseconds for up to `limit`.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
