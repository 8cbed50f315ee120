//! Platform-wide sliding window on account creation.

use std::sync::Arc;

use crate::config::Quota;
use crate::error::{Result, ServerError};
use crate::store::{Clock, CounterStore, QuotaDecision, WindowPolicy};

/// Limiter capping how many accounts the whole platform creates inside
/// one window, independent of the requesting identities.
#[derive(Clone)]
pub struct QuotaGuard {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    policy: WindowPolicy,
}

impl QuotaGuard {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: &Quota,
    ) -> Self {
        Self {
            store,
            clock,
            policy: WindowPolicy {
                window_seconds: config.window_seconds,
                max_creations: config.max_creations,
            },
        }
    }

    /// Pass and record one creation, or reject with the time until the
    /// oldest in-window entry expires.
    pub async fn check_and_record_creation(&self) -> Result<()> {
        let decision = self
            .store
            .record_creation(self.policy, self.clock.now())
            .await?;

        match decision {
            QuotaDecision::Allowed => Ok(()),
            QuotaDecision::Exceeded { retry_after } => {
                tracing::warn!(retry_after, "new account quota exceeded");
                metrics::counter!("passwordless_quota_rejections_total")
                    .increment(1);
                Err(ServerError::QuotaExceeded { retry_after })
            },
        }
    }
}
