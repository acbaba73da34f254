//! Periodic removal of finished import sessions.
//!
//! Committed and cancelled sessions keep their parsed file in memory until
//! this job drops them, once they have been idle for the configured
//! retention.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::sessions::SessionRegistry;

/// How often the sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the session sweep loop until `cancel` is triggered.
pub async fn run(sessions: Arc<SessionRegistry>, retention: Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Session retention job started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Session retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let removed = sessions.sweep(retention).await;
                if removed > 0 {
                    let remaining = sessions.len().await;
                    tracing::info!(removed, remaining, "Session retention: dropped finished sessions");
                } else {
                    tracing::debug!("Session retention: nothing to drop");
                }
            }
        }
    }
}
