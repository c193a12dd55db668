//! Confirmation monitoring for broadcast transactions.

use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, timeout, MissedTickBehavior};

use crate::explorer::types::ClientResult;
use crate::explorer::ExplorerApi;

/// Transaction confirmation status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Not yet mined.
    Pending,
    /// Mined, but not yet at the required depth.
    Confirming { current: u32, required: u32 },
    /// Mined at the required depth.
    Confirmed { block_height: u64 },
}

/// Polls the explorer until a transaction reaches the required depth.
#[derive(Debug, Clone)]
pub struct ConfirmationMonitor {
    explorer: ExplorerApi,
    required: u32,
    poll_interval: Duration,
}

impl ConfirmationMonitor {
    pub fn new(explorer: ExplorerApi, required: u32, poll_interval: Duration) -> Self {
        Self {
            explorer,
            required: required.max(1),
            poll_interval,
        }
    }

    /// Current status of `txid`.
    pub async fn check(&self, txid: &str) -> ClientResult<ConfirmationStatus> {
        let status = self.explorer.transaction_status(txid).await?;
        if !status.confirmed {
            return Ok(ConfirmationStatus::Pending);
        }

        let tip = self.explorer.tip_height().await?;
        let current = status.confirmations(tip);
        match status.block_height {
            Some(block_height) if current >= self.required => {
                Ok(ConfirmationStatus::Confirmed { block_height })
            }
            _ => Ok(ConfirmationStatus::Confirming {
                current,
                required: self.required,
            }),
        }
    }

    /// Poll until confirmed or `limit` elapses.
    ///
    /// Polling errors are logged and retried on the next tick. At the
    /// deadline the last observed status is returned.
    pub async fn wait_for_confirmation(&self, txid: &str, limit: Duration) -> ConfirmationStatus {
        let mut last = ConfirmationStatus::Pending;

        let poll = async {
            let mut ticker = interval(self.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                match self.check(txid).await {
                    Ok(status @ ConfirmationStatus::Confirmed { .. }) => return status,
                    Ok(status) => {
                        tracing::debug!(txid = %txid, status = ?status, "Waiting for confirmations");
                        last = status;
                    }
                    Err(e) => {
                        tracing::warn!(txid = %txid, error = %e, "Confirmation check failed");
                    }
                }
            }
        };

        let outcome = timeout(limit, poll).await;
        match outcome {
            Ok(status) => status,
            Err(_) => {
                tracing::info!(txid = %txid, "Stopped waiting for confirmation");
                last
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::test_support::{explorer, test_config, Router};
    use std::sync::Arc;

    const TXID: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    fn status_path() -> String {
        format!("/tx/{}/status", TXID)
    }

    fn monitor(router: Arc<Router>, required: u32) -> ConfirmationMonitor {
        let config = test_config();
        ConfirmationMonitor::new(explorer(router, &config), required, Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_pending_and_confirming() {
        let router = Arc::new(Router::default());
        router.on("GET", &status_path(), 200, r#"{"confirmed":false}"#);
        router.on(
            "GET",
            &status_path(),
            200,
            r#"{"confirmed":true,"block_height":800000}"#,
        );
        router.on("GET", "/blocks/tip/height", 200, "800001");
        let monitor = monitor(router, 3);

        assert_eq!(monitor.check(TXID).await.unwrap(), ConfirmationStatus::Pending);
        assert_eq!(
            monitor.check(TXID).await.unwrap(),
            ConfirmationStatus::Confirming {
                current: 2,
                required: 3
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_confirmed() {
        let router = Arc::new(Router::default());
        router.on("GET", &status_path(), 200, r#"{"confirmed":false}"#);
        router.on("GET", &status_path(), 200, r#"{"confirmed":false}"#);
        router.on(
            "GET",
            &status_path(),
            200,
            r#"{"confirmed":true,"block_height":800000}"#,
        );
        router.on("GET", "/blocks/tip/height", 200, "800000");
        let monitor = monitor(router.clone(), 1);

        let status = monitor
            .wait_for_confirmation(TXID, Duration::from_secs(600))
            .await;
        assert_eq!(
            status,
            ConfirmationStatus::Confirmed {
                block_height: 800_000
            }
        );
        assert_eq!(router.hits("GET", &status_path()), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_returns_last_status_at_deadline() {
        let router = Arc::new(Router::default());
        router.on("GET", &status_path(), 200, r#"{"confirmed":false}"#);
        let monitor = monitor(router, 1);

        let status = monitor
            .wait_for_confirmation(TXID, Duration::from_secs(95))
            .await;
        assert_eq!(status, ConfirmationStatus::Pending);
    }
}
