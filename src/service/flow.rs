//! The two public authentication flows, composed from the guards and
//! services.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::Serialize;

use crate::account::Account;
use crate::config::Configuration;
use crate::error::{Result, ServerError, field_error};
use crate::guard::{QuotaGuard, ThrottleGuard};
use crate::mail::Notifier;
use crate::service::{ResetKeyService, TokenRenewalService, UserProvisioner};
use crate::store::{Clock, CounterStore, CredentialStore, IdentityStore};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.+_-]+@[A-Za-z0-9._-]+\.[a-zA-Z]*$")
        .expect("email pattern is valid")
});

pub(crate) fn email_is_valid(email: &str) -> bool {
    EMAIL.is_match(email)
}

fn missing_email() -> ServerError {
    field_error("email", "Missing email.")
}

fn invalid_email() -> ServerError {
    field_error("email", "Invalid email.")
}

fn unknown_account() -> ServerError {
    field_error("email", "Email does not correspond to a registered account.")
}

/// Freshly issued API token, as returned to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Best-effort outcome of a revocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevokeOutcome {
    Success,
    Failed,
}

impl RevokeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

/// Entry point for every public operation.
///
/// Failures from the guards and services propagate unchanged; nothing
/// here retries. The wait carried by a rate-limit or quota rejection is
/// the contract for when a caller-driven retry might succeed.
#[derive(Clone)]
pub struct AuthFlowOrchestrator {
    identities: Arc<dyn IdentityStore>,
    credentials: Arc<dyn CredentialStore>,
    throttle: ThrottleGuard,
    provisioner: UserProvisioner,
    reset: ResetKeyService,
    renewal: TokenRenewalService,
    clock: Arc<dyn Clock>,
    config: Arc<Configuration>,
}

impl AuthFlowOrchestrator {
    pub fn new(
        config: Arc<Configuration>,
        identities: Arc<dyn IdentityStore>,
        credentials: Arc<dyn CredentialStore>,
        counters: Arc<dyn CounterStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let throttle = ThrottleGuard::new(
            counters.clone(),
            clock.clone(),
            &config.throttle,
        );
        let quota =
            QuotaGuard::new(counters, clock.clone(), &config.quota);
        let provisioner = UserProvisioner::new(
            identities.clone(),
            notifier.clone(),
            quota,
            clock.clone(),
            config.clone(),
        );
        let reset = ResetKeyService::new(
            identities.clone(),
            notifier,
            config.clone(),
        );
        let renewal = TokenRenewalService::new(
            credentials.clone(),
            clock.clone(),
            &config.token.reserved_name,
        );

        Self {
            identities,
            credentials,
            throttle,
            provisioner,
            reset,
            renewal,
            clock,
            config,
        }
    }

    /// Resolve a presented API token to the account holding it.
    ///
    /// Unknown and expired tokens resolve to `None`; the caller decides
    /// whether that is an error.
    pub async fn session_from_token(
        &self,
        secret: &str,
    ) -> Result<Option<String>> {
        let Some(credential) =
            self.credentials.find_by_secret(secret).await?
        else {
            return Ok(None);
        };

        if credential.expired(self.clock.now()) {
            return Ok(None);
        }

        Ok(Some(credential.account_id))
    }

    /// Flow A: validate, throttle, provision when the identity is new,
    /// then issue and mail a reset key.
    pub async fn request_reset_key(
        &self,
        session: Option<&str>,
        email: Option<&str>,
    ) -> Result<()> {
        if session.is_some() {
            tracing::warn!("authenticated caller requested a reset key");
            return Err(ServerError::AlreadyAuthenticated);
        }

        let email = email.ok_or_else(missing_email)?.to_lowercase();
        if !email_is_valid(&email) {
            return Err(invalid_email());
        }

        self.throttle.check_and_record(&email).await?;

        let account = match self.identities.find_by_email(&email).await? {
            Some(account) => account,
            None => self.provisioner.provision(&email).await?,
        };

        self.reset.issue(&account).await
    }

    /// Flow B: validate, burn the reset key, renew the main token and
    /// forgive past throttled attempts.
    pub async fn request_api_token(
        &self,
        session: Option<&str>,
        email: Option<&str>,
        key: Option<&str>,
    ) -> Result<IssuedToken> {
        if session.is_some() {
            tracing::warn!("authenticated caller requested an API token");
            return Err(ServerError::AlreadyAuthenticated);
        }

        let email = email.ok_or_else(missing_email)?.to_lowercase();
        let key = key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| field_error("key", "Missing token."))?;
        if !email_is_valid(&email) {
            return Err(invalid_email());
        }

        let account = self
            .identities
            .find_by_email(&email)
            .await?
            .ok_or_else(unknown_account)?;

        self.reset.verify_and_consume(&account, key).await?;

        let credential = self
            .renewal
            .renew_main(
                &account.id,
                self.config.token.default_lifetime,
                self.config.token.default_unit,
            )
            .await?;

        // The exchange proved control of the identity; earlier failed
        // attempts stop counting.
        self.throttle.clear(&email).await?;

        Ok(IssuedToken {
            token: credential.secret,
            expires_at: credential.expires_at,
        })
    }

    /// Revoke the caller's main token, or a token supplied explicitly.
    ///
    /// Advisory by design: downstream failure maps to
    /// [`RevokeOutcome::Failed`] instead of propagating, so logout paths
    /// can always complete. Absent or undecodable input is still a
    /// validation error.
    pub async fn revoke_token(
        &self,
        session: Option<&str>,
        token: Option<&str>,
    ) -> Result<RevokeOutcome> {
        if let Some(account_id) = session {
            // No revoke permission needed: renew to a token that
            // expires almost immediately.
            return match self.renewal.revoke_quickly(account_id).await {
                Ok(_) => Ok(RevokeOutcome::Success),
                Err(err) => {
                    tracing::warn!(
                        account_id,
                        error = %err,
                        "quick revocation failed"
                    );
                    Ok(RevokeOutcome::Failed)
                },
            };
        }

        let token = token.filter(|t| !t.is_empty()).ok_or_else(|| {
            field_error("token", "Missing API token to revoke.")
        })?;

        let credential = self
            .credentials
            .find_by_secret(token)
            .await?
            .ok_or_else(|| {
                field_error("token", "Failed to decode token, not valid.")
            })?;

        match self.credentials.revoke(&credential.id).await {
            Ok(()) => Ok(RevokeOutcome::Success),
            Err(err) => {
                tracing::warn!(error = %err, "could not revoke API token");
                Ok(RevokeOutcome::Failed)
            },
        }
    }

    /// Return the caller's account and a renewed main token.
    pub async fn get_current_account_and_renew(
        &self,
        session: Option<&str>,
    ) -> Result<(Account, IssuedToken)> {
        let account_id = session.ok_or(ServerError::Unauthorized)?;

        let account = self
            .identities
            .find_by_id(account_id)
            .await?
            .ok_or_else(|| {
                field_error("user", "Could not find an account for this token.")
            })?;

        let credential = self
            .renewal
            .renew_main(
                &account.id,
                self.config.token.default_lifetime,
                self.config.token.default_unit,
            )
            .await?;

        Ok((
            account,
            IssuedToken {
                token: credential.secret,
                expires_at: credential.expires_at,
            },
        ))
    }

    /// Whether the caller's token maps to a live account.
    pub async fn check_token_valid(
        &self,
        session: Option<&str>,
    ) -> Result<bool> {
        let Some(account_id) = session else {
            return Ok(false);
        };

        Ok(self.identities.find_by_id(account_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{RecordingNotifier, Template};
    use crate::store::{ManualClock, MemoryStore};
    use chrono::{Duration, TimeZone, Utc};

    struct Harness {
        flows: AuthFlowOrchestrator,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let flows = AuthFlowOrchestrator::new(
            Arc::new(Configuration::default()),
            store.clone(),
            store.clone(),
            store.clone(),
            notifier.clone(),
            clock.clone(),
        );

        Harness {
            flows,
            store,
            notifier,
            clock,
        }
    }

    #[test]
    fn email_validation_follows_the_documented_pattern() {
        assert!(email_is_valid("a.b@example.com"));
        assert!(email_is_valid("user+tag@sub.example.org"));

        assert!(!email_is_valid(""));
        assert!(!email_is_valid("no-at-sign"));
        assert!(!email_is_valid("missing@domain"));
        assert!(!email_is_valid("two@@example.com"));
    }

    #[tokio::test]
    async fn malformed_emails_never_touch_the_counters() {
        let h = harness();

        for email in [None, Some(""), Some("no-at-sign"), Some("a@b")] {
            let err = h
                .flows
                .request_reset_key(None, email)
                .await
                .unwrap_err();
            assert!(matches!(err, ServerError::Validation(_)), "{email:?}");
        }

        assert!(h.store.throttle_record("a@b").await.is_none());
        assert_eq!(h.store.creation_count().await, 0);
    }

    #[tokio::test]
    async fn authenticated_callers_are_rejected() {
        let h = harness();

        let err = h
            .flows
            .request_reset_key(Some("acc-1"), Some("a@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyAuthenticated));

        let err = h
            .flows
            .request_api_token(
                Some("acc-1"),
                Some("a@example.com"),
                Some("key"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyAuthenticated));
    }

    #[tokio::test]
    async fn unknown_email_is_validation_shaped_on_exchange() {
        let h = harness();

        let err = h
            .flows
            .request_api_token(None, Some("ghost@example.com"), Some("key"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn deleted_accounts_cannot_request_keys() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("gone@example.com"))
            .await
            .unwrap();
        let account = h
            .store
            .find_by_email("gone@example.com")
            .await
            .unwrap()
            .unwrap();
        h.store.mark_deleted(&account.id).await;

        h.clock.advance(Duration::seconds(10));
        let err = h
            .flows
            .request_reset_key(None, Some("gone@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AccountDeleted));
    }

    #[tokio::test]
    async fn identity_is_case_normalized() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("MiXeD@Example.COM"))
            .await
            .unwrap();

        assert!(
            h.store
                .find_by_email("mixed@example.com")
                .await
                .unwrap()
                .is_some()
        );
        // The throttle key is the normalized identity, so changing case
        // does not evade the limiter.
        let err = h
            .flows
            .request_reset_key(None, Some("mixed@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn full_journey_for_a_new_identity() {
        let h = harness();

        // Request: provisions the account, mails welcome + login token.
        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();

        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].template, Template::Welcome);
        assert_eq!(sent[1].template, Template::LoginToken);

        let key = sent[1].vars["key"].clone();

        // Exchange: key for token, throttle record cleared.
        let issued = h
            .flows
            .request_api_token(None, Some("new@user.com"), Some(&key))
            .await
            .unwrap();
        assert!(!issued.token.is_empty());
        assert_eq!(
            issued.expires_at,
            h.clock.now() + Duration::seconds(3 * 86_400)
        );
        assert!(h.store.throttle_record("new@user.com").await.is_none());

        // Replay of the consumed key fails.
        let err = h
            .flows
            .request_api_token(None, Some("new@user.com"), Some(&key))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        // The issued token authenticates its holder.
        let account = h
            .store
            .find_by_email("new@user.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            h.flows
                .session_from_token(&issued.token)
                .await
                .unwrap()
                .as_deref(),
            Some(account.id.as_str())
        );
    }

    #[tokio::test]
    async fn second_request_for_existing_identity_sends_no_welcome() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();
        h.clock.advance(Duration::seconds(10));
        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();

        let welcomes = h
            .notifier
            .sent()
            .iter()
            .filter(|m| m.template == Template::Welcome)
            .count();
        assert_eq!(welcomes, 1);
        assert_eq!(h.store.creation_count().await, 1);
    }

    #[tokio::test]
    async fn expired_tokens_resolve_to_no_session() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();
        let key = h.notifier.sent()[1].vars["key"].clone();
        let issued = h
            .flows
            .request_api_token(None, Some("new@user.com"), Some(&key))
            .await
            .unwrap();

        h.clock.advance(Duration::seconds(4 * 86_400));
        assert!(
            h.flows
                .session_from_token(&issued.token)
                .await
                .unwrap()
                .is_none()
        );
        assert!(!h.flows.check_token_valid(None).await.unwrap());
    }

    #[tokio::test]
    async fn session_revocation_is_a_one_second_renewal() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();
        let key = h.notifier.sent()[1].vars["key"].clone();
        let issued = h
            .flows
            .request_api_token(None, Some("new@user.com"), Some(&key))
            .await
            .unwrap();
        let account_id = h
            .flows
            .session_from_token(&issued.token)
            .await
            .unwrap()
            .unwrap();

        let outcome = h
            .flows
            .revoke_token(Some(&account_id), None)
            .await
            .unwrap();
        assert_eq!(outcome, RevokeOutcome::Success);

        // The old secret was replaced, and the replacement dies fast.
        assert!(
            h.flows
                .session_from_token(&issued.token)
                .await
                .unwrap()
                .is_none()
        );
        h.clock.advance(Duration::seconds(2));
        let remaining = h.store.list(&account_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].expired(h.clock.now()));
    }

    #[tokio::test]
    async fn anonymous_revocation_by_token_value() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();
        let key = h.notifier.sent()[1].vars["key"].clone();
        let issued = h
            .flows
            .request_api_token(None, Some("new@user.com"), Some(&key))
            .await
            .unwrap();

        let outcome = h
            .flows
            .revoke_token(None, Some(&issued.token))
            .await
            .unwrap();
        assert_eq!(outcome, RevokeOutcome::Success);
        assert!(
            h.flows
                .session_from_token(&issued.token)
                .await
                .unwrap()
                .is_none()
        );

        // Missing and unknown tokens are validation errors.
        let err = h.flows.revoke_token(None, None).await.unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
        let err = h
            .flows
            .revoke_token(None, Some("not-a-token"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn current_account_renewal_rotates_the_secret() {
        let h = harness();

        h.flows
            .request_reset_key(None, Some("new@user.com"))
            .await
            .unwrap();
        let key = h.notifier.sent()[1].vars["key"].clone();
        let issued = h
            .flows
            .request_api_token(None, Some("new@user.com"), Some(&key))
            .await
            .unwrap();
        let account_id = h
            .flows
            .session_from_token(&issued.token)
            .await
            .unwrap()
            .unwrap();

        assert!(
            h.flows
                .check_token_valid(Some(&account_id))
                .await
                .unwrap()
        );

        let (account, renewed) = h
            .flows
            .get_current_account_and_renew(Some(&account_id))
            .await
            .unwrap();
        assert_eq!(account.id, account_id);
        assert_ne!(renewed.token, issued.token);
        assert_eq!(h.store.list(&account_id).await.unwrap().len(), 1);

        let err = h
            .flows
            .get_current_account_and_renew(None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Unauthorized));
    }
}
