//! Issue and consume single-use reset keys.

use std::sync::Arc;
use std::time::Duration;

use crate::account::{Account, AccountState, ResetKey};
use crate::config::Configuration;
use crate::error::{Result, ServerError, field_error};
use crate::mail::{Message, Notifier, Template};
use crate::store::IdentityStore;

/// Upper bound on notifier latency. The key is committed before the
/// notification goes out, so a timeout is reported without rollback.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn invalid_key() -> ServerError {
    field_error("key", "Token provided is not valid.")
}

/// Issues single-use reset keys and validates them on exchange.
#[derive(Clone)]
pub struct ResetKeyService {
    identities: Arc<dyn IdentityStore>,
    notifier: Arc<dyn Notifier>,
    config: Arc<Configuration>,
}

impl ResetKeyService {
    pub fn new(
        identities: Arc<dyn IdentityStore>,
        notifier: Arc<dyn Notifier>,
        config: Arc<Configuration>,
    ) -> Self {
        Self {
            identities,
            notifier,
            config,
        }
    }

    /// Generate a fresh key, persist it and send it to the user.
    ///
    /// A notification failure is reported, not swallowed; the key is
    /// already committed, so a retried `issue` simply regenerates.
    pub async fn issue(&self, account: &Account) -> Result<()> {
        if account.state == AccountState::Deleted {
            return Err(ServerError::AccountDeleted);
        }

        let key = ResetKey::generate();
        self.identities
            .set_reset_key(&account.id, &key.encode())
            .await?;

        tracing::debug!(account_id = account.id, "reset key issued");
        metrics::counter!("passwordless_reset_keys_issued_total")
            .increment(1);

        let message = self.login_token_message(account, key.value());
        match tokio::time::timeout(
            NOTIFY_TIMEOUT,
            self.notifier.send(&message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ServerError::Notification {
                details: "notifier timed out".to_owned(),
            }),
        }
    }

    /// Compare `supplied` against the stored key and burn it on success.
    ///
    /// The stored representation may carry the historical `b'...'`
    /// envelope; both sides are normalized before comparison. A match
    /// immediately regenerates the stored key, so the consumed value can
    /// never be replayed. A mismatch mutates nothing.
    pub async fn verify_and_consume(
        &self,
        account: &Account,
        supplied: &str,
    ) -> Result<()> {
        let valid = account
            .reset_key
            .as_deref()
            .is_some_and(|stored| ResetKey::matches(stored, supplied));

        if !valid {
            tracing::debug!(
                account_id = account.id,
                "reset key rejected"
            );
            return Err(invalid_key());
        }

        let fresh = ResetKey::generate();
        self.identities
            .set_reset_key(&account.id, &fresh.encode())
            .await?;

        Ok(())
    }

    fn login_token_message(&self, account: &Account, key: &str) -> Message {
        let mut vars = std::collections::BTreeMap::new();
        vars.insert("site_title", self.config.name.clone());
        vars.insert("site_url", self.config.url.clone());
        vars.insert("user_name", account.username.clone());
        vars.insert("user_fullname", account.display_name.clone());
        vars.insert("user_email", account.email.clone());
        vars.insert("key", key.to_owned());

        Message {
            template: Template::LoginToken,
            to: account.email.clone(),
            subject: format!("{} access token", self.config.name),
            vars,
        }
    }
}
