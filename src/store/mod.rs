//! Ports for the external collaborators: identity store, credential
//! store and the shared counter store backing both guards.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::account::{Account, NamedCredential};
use crate::error::Result;

/// Time source, injectable so guard behavior is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests.
#[cfg(test)]
pub struct ManualClock(std::sync::Mutex<DateTime<Utc>>);

#[cfg(test)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self(std::sync::Mutex::new(start))
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += duration;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Per-identity backoff state.
#[derive(Clone, Debug, PartialEq)]
pub struct ThrottleRecord {
    /// Monotonic counter, starts at 1.
    pub attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
}

/// Backoff rule evaluated inside the store.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base: u32,
    /// Exponent cap keeping `base^attempts` inside `u64`.
    pub max_attempts: u32,
}

/// Sliding-window rule evaluated inside the store.
#[derive(Clone, Copy, Debug)]
pub struct WindowPolicy {
    pub window_seconds: u64,
    pub max_creations: usize,
}

/// Outcome of one throttle check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThrottleDecision {
    Allowed { attempts: u32 },
    Throttled { retry_after: u64 },
}

/// Outcome of one quota check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum QuotaDecision {
    Allowed,
    Exceeded { retry_after: u64 },
}

/// Outcome of an account insert.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CreateOutcome {
    Created,
    /// Another account already holds the requested username.
    UsernameTaken,
}

/// Port for account persistence.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find an account by its identifier.
    async fn find_by_id(&self, id: &str) -> Result<Option<Account>>;

    /// Find an account by lowercased email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Find an account by username.
    async fn find_by_username(&self, username: &str)
    -> Result<Option<Account>>;

    /// Insert a new account, refusing username collisions.
    async fn create(&self, account: &Account) -> Result<CreateOutcome>;

    /// Replace the stored reset-key representation for an account.
    async fn set_reset_key(&self, account_id: &str, encoded: &str)
    -> Result<()>;
}

/// Port for named API token persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// All credentials currently held by an account.
    async fn list(&self, account_id: &str) -> Result<Vec<NamedCredential>>;

    /// Persist a freshly issued credential.
    async fn create(&self, credential: &NamedCredential) -> Result<()>;

    /// Remove a credential by its identifier.
    async fn revoke(&self, credential_id: &str) -> Result<()>;

    /// Resolve a presented secret back to its credential.
    async fn find_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<NamedCredential>>;
}

/// Port for the shared, mutable limiter counters.
///
/// Each operation is a single atomic check-then-write: two concurrent
/// requests for the same identity must never both observe "allowed".
/// Any backend with conditional writes or server-side scripting can
/// satisfy this.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Apply the backoff rule for one identity and record the attempt
    /// when it passes. Rejected attempts leave the record untouched.
    async fn throttle_attempt(
        &self,
        identity: &str,
        policy: BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<ThrottleDecision>;

    /// Drop the backoff record for one identity.
    async fn clear_throttle(&self, identity: &str) -> Result<()>;

    /// Apply the creation-window rule and record the creation when it
    /// passes. Entries older than the window are pruned on each call.
    async fn record_creation(
        &self,
        policy: WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision>;
}
