//! In-memory reference store.
//!
//! Backs single-process deployments and every test. All check-then-write
//! sequences run under one lock acquisition, which is what gives the
//! [`CounterStore`] operations their atomicity.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::account::{Account, NamedCredential};
use crate::error::Result;
use crate::store::{
    BackoffPolicy, CounterStore, CreateOutcome, CredentialStore,
    IdentityStore, QuotaDecision, ThrottleDecision, ThrottleRecord,
    WindowPolicy,
};

#[derive(Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<String, Account>>,
    credentials: Mutex<HashMap<String, NamedCredential>>,
    throttle: Mutex<HashMap<String, ThrottleRecord>>,
    creations: Mutex<VecDeque<DateTime<Utc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub async fn throttle_record(
        &self,
        identity: &str,
    ) -> Option<ThrottleRecord> {
        self.throttle.lock().await.get(identity).cloned()
    }

    #[cfg(test)]
    pub async fn creation_count(&self) -> usize {
        self.creations.lock().await.len()
    }

    #[cfg(test)]
    pub async fn mark_deleted(&self, account_id: &str) {
        if let Some(account) = self.accounts.lock().await.get_mut(account_id)
        {
            account.state = crate::account::AccountState::Deleted;
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.accounts.lock().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|account| account.email == email)
            .cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<Account>> {
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|account| account.username == username)
            .cloned())
    }

    async fn create(&self, account: &Account) -> Result<CreateOutcome> {
        let mut accounts = self.accounts.lock().await;

        // Uniqueness check and insert under the same lock.
        if accounts
            .values()
            .any(|existing| existing.username == account.username)
        {
            return Ok(CreateOutcome::UsernameTaken);
        }

        accounts.insert(account.id.clone(), account.clone());
        Ok(CreateOutcome::Created)
    }

    async fn set_reset_key(
        &self,
        account_id: &str,
        encoded: &str,
    ) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        if let Some(account) = accounts.get_mut(account_id) {
            account.reset_key = Some(encoded.to_owned());
        }
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn list(&self, account_id: &str) -> Result<Vec<NamedCredential>> {
        Ok(self
            .credentials
            .lock()
            .await
            .values()
            .filter(|credential| credential.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn create(&self, credential: &NamedCredential) -> Result<()> {
        self.credentials
            .lock()
            .await
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn revoke(&self, credential_id: &str) -> Result<()> {
        self.credentials.lock().await.remove(credential_id);
        Ok(())
    }

    async fn find_by_secret(
        &self,
        secret: &str,
    ) -> Result<Option<NamedCredential>> {
        Ok(self
            .credentials
            .lock()
            .await
            .values()
            .find(|credential| credential.secret == secret)
            .cloned())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn throttle_attempt(
        &self,
        identity: &str,
        policy: BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Result<ThrottleDecision> {
        let mut records = self.throttle.lock().await;

        let Some(record) = records.get_mut(identity) else {
            records.insert(
                identity.to_owned(),
                ThrottleRecord {
                    attempts: 1,
                    last_attempt_at: now,
                },
            );
            return Ok(ThrottleDecision::Allowed { attempts: 1 });
        };

        let exponent = record.attempts.min(policy.max_attempts);
        let wait = u64::from(policy.base).pow(exponent);
        let deadline =
            record.last_attempt_at + Duration::seconds(wait as i64);

        if now < deadline {
            // Early retries must not reset the window.
            let retry_after =
                (deadline - now).num_seconds().max(0) as u64;
            return Ok(ThrottleDecision::Throttled { retry_after });
        }

        record.attempts += 1;
        record.last_attempt_at = now;
        Ok(ThrottleDecision::Allowed {
            attempts: record.attempts,
        })
    }

    async fn clear_throttle(&self, identity: &str) -> Result<()> {
        self.throttle.lock().await.remove(identity);
        Ok(())
    }

    async fn record_creation(
        &self,
        policy: WindowPolicy,
        now: DateTime<Utc>,
    ) -> Result<QuotaDecision> {
        let mut creations = self.creations.lock().await;
        let window = Duration::seconds(policy.window_seconds as i64);
        let begin = now - window;

        // Lazy prune of expired entries.
        while creations.front().is_some_and(|&at| at < begin) {
            creations.pop_front();
        }

        if creations.len() >= policy.max_creations {
            let retry_after = creations
                .front()
                .map(|&oldest| {
                    ((oldest + window) - now).num_seconds().max(0) as u64
                })
                .unwrap_or_default();
            return Ok(QuotaDecision::Exceeded { retry_after });
        }

        creations.push_back(now);
        Ok(QuotaDecision::Allowed)
    }
}
