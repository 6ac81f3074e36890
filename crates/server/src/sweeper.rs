use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::info;

use handoff_core::handoff::{EscalationCoordinator, TimeoutSweeper};

/// Runs the timeout sweep on a fixed interval until the server shuts
/// down. The first tick fires immediately so a restart clears any
/// backlog of overdue tickets straight away.
pub fn spawn(coordinator: Arc<EscalationCoordinator>, interval_secs: u64) -> JoinHandle<()> {
    let sweeper = TimeoutSweeper::new(coordinator);
    info!(
        event_name = "system.sweeper.start",
        correlation_id = "bootstrap",
        interval_secs,
        "timeout sweeper started"
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            sweeper.run_once(Utc::now()).await;
        }
    })
}
