//! Revoke-and-reissue of the one named API token per account.

use std::sync::Arc;

use chrono::Duration;

use crate::account::{NamedCredential, generate_id, generate_secret};
use crate::error::Result;
use crate::store::{Clock, CredentialStore};

/// Maintains the "at most one credential named `main` per account"
/// invariant. The store does not enforce it; this service does, by
/// revoking every same-named credential before issuing a fresh one.
#[derive(Clone)]
pub struct TokenRenewalService {
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    reserved_name: String,
}

impl TokenRenewalService {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        reserved_name: &str,
    ) -> Self {
        Self {
            credentials,
            clock,
            reserved_name: reserved_name.to_owned(),
        }
    }

    /// Revoke every credential named after the reserved name, then issue
    /// a fresh one expiring in `lifetime * unit` seconds.
    ///
    /// More than one pre-existing credential with the name is tolerated
    /// and cleaned up. The returned credential carries its secret; this
    /// is the only moment the secret is visible.
    pub async fn renew_main(
        &self,
        account_id: &str,
        lifetime: i64,
        unit: i64,
    ) -> Result<NamedCredential> {
        let existing = self.credentials.list(account_id).await?;
        for credential in
            existing.iter().filter(|c| c.name == self.reserved_name)
        {
            tracing::debug!(
                account_id,
                credential_id = credential.id,
                "revoking named token"
            );
            self.credentials.revoke(&credential.id).await?;
        }

        let now = self.clock.now();
        let credential = NamedCredential {
            id: generate_id(),
            account_id: account_id.to_owned(),
            name: self.reserved_name.clone(),
            secret: generate_secret(),
            issued_at: now,
            expires_at: now
                + Duration::seconds(lifetime.saturating_mul(unit)),
        };
        self.credentials.create(&credential).await?;

        metrics::counter!("passwordless_tokens_renewed_total").increment(1);
        Ok(credential)
    }

    /// Renew to a token that dies after one second.
    ///
    /// Logically equivalent to revocation, without requiring revoke
    /// permission on the caller's behalf.
    pub async fn revoke_quickly(
        &self,
        account_id: &str,
    ) -> Result<NamedCredential> {
        self.renew_main(account_id, 1, 1).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ManualClock, MemoryStore};
    use chrono::{TimeZone, Utc};

    fn service() -> (TokenRenewalService, Arc<MemoryStore>, Arc<ManualClock>)
    {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let service =
            TokenRenewalService::new(store.clone(), clock.clone(), "main");
        (service, store, clock)
    }

    #[tokio::test]
    async fn repeated_renewal_keeps_exactly_one_main() {
        let (service, store, _clock) = service();

        let mut secrets = Vec::new();
        for _ in 0..5 {
            let credential =
                service.renew_main("acc-1", 3, 86_400).await.unwrap();
            secrets.push(credential.secret);
        }

        let remaining = store.list("acc-1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "main");
        assert_eq!(remaining[0].secret, secrets[4]);

        // Every issued secret was fresh.
        secrets.sort();
        secrets.dedup();
        assert_eq!(secrets.len(), 5);
    }

    #[tokio::test]
    async fn renewal_cleans_up_duplicate_mains() {
        let (service, store, clock) = service();

        // Two pre-existing `main` tokens, as a broken store could hold.
        for _ in 0..2 {
            store
                .create(&NamedCredential {
                    id: generate_id(),
                    account_id: "acc-1".to_owned(),
                    name: "main".to_owned(),
                    secret: generate_secret(),
                    issued_at: clock.now(),
                    expires_at: clock.now() + Duration::seconds(3600),
                })
                .await
                .unwrap();
        }

        service.renew_main("acc-1", 3, 86_400).await.unwrap();

        assert_eq!(store.list("acc-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_named_tokens_are_untouched() {
        let (service, store, clock) = service();

        store
            .create(&NamedCredential {
                id: generate_id(),
                account_id: "acc-1".to_owned(),
                name: "ci".to_owned(),
                secret: generate_secret(),
                issued_at: clock.now(),
                expires_at: clock.now() + Duration::seconds(3600),
            })
            .await
            .unwrap();

        service.renew_main("acc-1", 3, 86_400).await.unwrap();

        let names: Vec<_> = store
            .list("acc-1")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"ci".to_owned()));
    }

    #[tokio::test]
    async fn expiry_is_lifetime_times_unit() {
        let (service, _store, clock) = service();

        let credential =
            service.renew_main("acc-1", 3, 86_400).await.unwrap();
        assert_eq!(
            credential.expires_at,
            clock.now() + Duration::seconds(3 * 86_400)
        );
    }

    #[tokio::test]
    async fn quick_revocation_leaves_a_one_second_token() {
        let (service, _store, clock) = service();

        let credential = service.revoke_quickly("acc-1").await.unwrap();
        assert_eq!(
            credential.expires_at,
            clock.now() + Duration::seconds(1)
        );

        clock.advance(Duration::seconds(2));
        assert!(credential.expired(clock.now()));
    }
}
