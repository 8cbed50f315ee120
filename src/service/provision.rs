//! Deterministic, collision-avoiding account creation.

use std::sync::Arc;

use crate::account::{Account, AccountState, generate_id, generate_secret};
use crate::config::Configuration;
use crate::error::{Result, ServerError};
use crate::guard::QuotaGuard;
use crate::mail::{Message, Notifier, Template};
use crate::store::{Clock, CreateOutcome, IdentityStore};

const MAX_USERNAME_LENGTH: usize = 99;
const MAX_PROBE_ATTEMPTS: u32 = 100_000;

/// Creates the account backing a new identity.
#[derive(Clone)]
pub struct UserProvisioner {
    identities: Arc<dyn IdentityStore>,
    notifier: Arc<dyn Notifier>,
    quota: QuotaGuard,
    clock: Arc<dyn Clock>,
    config: Arc<Configuration>,
}

impl UserProvisioner {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        notifier: Arc<dyn Notifier>,
        quota: QuotaGuard,
        clock: Arc<dyn Clock>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            identities,
            notifier,
            quota,
            clock,
            config,
        }
    }

    /// Create an account for `email`, which must not already have one.
    ///
    /// Usernames are derived from the email and probed for collisions
    /// with numeric suffixes; a collision observed at create time (a
    /// concurrent creation won the race) moves on to the next offset
    /// instead of failing.
    pub async fn provision(&self, email: &str) -> Result<Account> {
        self.quota.check_and_record_creation().await?;

        let mut created = None;
        for offset in 0..MAX_PROBE_ATTEMPTS {
            let username = derive_username(email, offset);
            if self
                .identities
                .find_by_username(&username)
                .await?
                .is_some()
            {
                tracing::debug!(username, "username taken, probing next");
                continue;
            }

            let account = Account {
                id: generate_id(),
                email: email.to_owned(),
                username,
                display_name: derive_display_name(email),
                state: AccountState::Active,
                password: generate_secret(),
                reset_key: None,
                created_at: self.clock.now(),
            };

            match self.identities.create(&account).await? {
                CreateOutcome::Created => {
                    created = Some(account);
                    break;
                },
                CreateOutcome::UsernameTaken => continue,
            }
        }

        let account = created.ok_or(ServerError::ProvisioningExhausted {
            attempts: MAX_PROBE_ATTEMPTS,
        })?;

        tracing::info!(
            account_id = account.id,
            username = account.username,
            "account provisioned"
        );
        metrics::counter!("passwordless_accounts_provisioned_total")
            .increment(1);

        // Welcome mail is advisory. Later, we should handle failures
        // with retries and DLQ.
        if let Err(err) =
            self.notifier.send(&self.welcome_message(&account)).await
        {
            tracing::warn!(
                account_id = account.id,
                error = %err,
                "welcome notification not delivered"
            );
        }

        Ok(account)
    }

    fn welcome_message(&self, account: &Account) -> Message {
        let mut vars = std::collections::BTreeMap::new();
        vars.insert("site_title", self.config.name.clone());
        vars.insert("site_url", self.config.url.clone());
        vars.insert("user_name", account.username.clone());
        vars.insert("user_fullname", account.display_name.clone());
        vars.insert("user_email", account.email.clone());
        if let Some(guidelines) = &self.config.guidelines {
            vars.insert("guidelines_url", guidelines.clone());
        }
        if let Some(policies) = &self.config.policies {
            vars.insert("policies_url", policies.clone());
        }

        Message {
            template: Template::Welcome,
            to: account.email.clone(),
            subject: format!("Welcome to {}", self.config.name),
            vars,
        }
    }
}

/// Slugify an email into a username: `@` becomes `-`, `.` becomes `_`.
///
/// A non-zero `offset` appends `_<offset>` while preserving the length
/// bound.
pub(crate) fn derive_username(email: &str, offset: u32) -> String {
    let slug = email.to_lowercase().replace('@', "-").replace('.', "_");

    if offset == 0 {
        return slug.chars().take(MAX_USERNAME_LENGTH).collect();
    }

    let suffix = format!("_{offset}");
    let keep = MAX_USERNAME_LENGTH - suffix.len();
    let mut username: String = slug.chars().take(keep).collect();
    username.push_str(&suffix);
    username
}

/// Derive a display name from the email local part.
pub(crate) fn derive_display_name(email: &str) -> String {
    email
        .split('@')
        .next()
        .unwrap_or_default()
        .replace(['.', '_'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>()
                        + &chars.as_str().to_lowercase()
                },
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quota;
    use crate::mail::RecordingNotifier;
    use crate::store::{ManualClock, MemoryStore};
    use chrono::{TimeZone, Utc};

    fn provisioner(
        max_creations: usize,
    ) -> (UserProvisioner, Arc<MemoryStore>, Arc<RecordingNotifier>) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let config = Arc::new(Configuration::default());
        let quota = QuotaGuard::new(
            store.clone(),
            clock.clone(),
            &Quota {
                window_seconds: 600,
                max_creations,
            },
        );
        let provisioner = UserProvisioner::new(
            store.clone(),
            notifier.clone(),
            quota,
            clock,
            config,
        );
        (provisioner, store, notifier)
    }

    #[test]
    fn username_derivation_is_deterministic() {
        assert_eq!(derive_username("a.b@example.com", 0), "a_b-example_com");
        assert_eq!(derive_username("A.B@Example.COM", 0), "a_b-example_com");
        assert_eq!(
            derive_username("a.b@example.com", 1),
            "a_b-example_com_1"
        );
    }

    #[test]
    fn username_respects_length_bound() {
        let long = format!("{}@example.com", "x".repeat(120));

        assert_eq!(derive_username(&long, 0).len(), MAX_USERNAME_LENGTH);

        let suffixed = derive_username(&long, 12);
        assert_eq!(suffixed.len(), MAX_USERNAME_LENGTH);
        assert!(suffixed.ends_with("_12"));
    }

    #[test]
    fn display_name_is_title_cased() {
        assert_eq!(derive_display_name("a.b@example.com"), "A B");
        assert_eq!(
            derive_display_name("john_DOE.smith@example.com"),
            "John Doe Smith"
        );
    }

    #[tokio::test]
    async fn collision_appends_numeric_suffix() {
        let (provisioner, _store, _notifier) = provisioner(10);

        let first = provisioner.provision("a.b@example.com").await.unwrap();
        assert_eq!(first.username, "a_b-example_com");

        // Same slug from a different identity must probe to the next
        // free suffix.
        let second = provisioner.provision("a:b@example.com").await.unwrap();
        assert_eq!(second.username, "a:b-example_com");

        let colliding =
            provisioner.provision("a.B@example.com").await.unwrap();
        assert_eq!(colliding.username, "a_b-example_com_1");
    }

    #[tokio::test]
    async fn quota_rejection_creates_nothing() {
        let (provisioner, store, notifier) = provisioner(1);

        provisioner.provision("one@example.com").await.unwrap();
        let err =
            provisioner.provision("two@example.com").await.unwrap_err();

        assert!(matches!(err, ServerError::QuotaExceeded { .. }));
        assert!(
            store
                .find_by_email("two@example.com")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn welcome_fires_once_with_full_payload() {
        let (provisioner, _store, notifier) = provisioner(10);

        let account =
            provisioner.provision("a.b@example.com").await.unwrap();

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].template, Template::Welcome);
        assert_eq!(sent[0].to, "a.b@example.com");
        assert_eq!(sent[0].vars["user_name"], account.username);
        assert_eq!(sent[0].vars["user_fullname"], "A B");
        assert_eq!(sent[0].vars["user_email"], "a.b@example.com");
    }
}
