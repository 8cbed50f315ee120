//! Per-identity exponential backoff on reset-key requests.

use std::sync::Arc;

use crate::config::Throttle;
use crate::error::{Result, ServerError};
use crate::store::{BackoffPolicy, Clock, CounterStore, ThrottleDecision};

/// Limiter enforcing a `base^attempts` seconds wait between requests
/// for the same identity.
#[derive(Clone)]
pub struct ThrottleGuard {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
}

impl ThrottleGuard {
    pub fn new(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        config: &Throttle,
    ) -> Self {
        Self {
            store,
            clock,
            policy: BackoffPolicy {
                base: config.base,
                max_attempts: config.max_attempts,
            },
        }
    }

    /// Pass or reject one request for `identity`.
    ///
    /// The first request creates the record; later ones advance it only
    /// when the backoff deadline has elapsed. A rejection leaves the
    /// record untouched, so retrying early never extends the wait.
    pub async fn check_and_record(&self, identity: &str) -> Result<()> {
        let decision = self
            .store
            .throttle_attempt(identity, self.policy, self.clock.now())
            .await?;

        match decision {
            ThrottleDecision::Allowed { attempts } => {
                tracing::debug!(identity, attempts, "reset attempt recorded");
                Ok(())
            },
            ThrottleDecision::Throttled { retry_after } => {
                tracing::debug!(
                    identity,
                    retry_after,
                    "reset attempt throttled"
                );
                metrics::counter!("passwordless_requests_throttled_total")
                    .increment(1);
                Err(ServerError::RateLimited { retry_after })
            },
        }
    }

    /// Forget the record for `identity`. Called once, after a successful
    /// key exchange, so past attempts stop counting against the user.
    pub async fn clear(&self, identity: &str) -> Result<()> {
        self.store.clear_throttle(identity).await
    }
}
