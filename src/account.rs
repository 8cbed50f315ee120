//! Account and credential value types.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Bytes of entropy behind every generated secret.
const SECRET_LENGTH: usize = 32;
const ID_LENGTH: usize = 16;

/// Generate an opaque hex-encoded secret.
pub(crate) fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a short hex-encoded record identifier.
pub(crate) fn generate_id() -> String {
    let mut bytes = [0u8; ID_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Lifecycle state of an [`Account`].
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AccountState {
    #[default]
    Active,
    Deleted,
}

/// Account as saved by the identity store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    /// Lowercased email, the natural lookup key.
    pub email: String,
    pub username: String,
    pub display_name: String,
    pub state: AccountState,
    /// Random placeholder satisfying the store's account contract.
    /// Never used to authenticate.
    #[serde(skip)]
    pub password: String,
    /// Stored representation of the current reset key, possibly wrapped
    /// in the historical `b'...'` envelope.
    #[serde(skip)]
    pub reset_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Named API token held by an account.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NamedCredential {
    pub id: String,
    pub account_id: String,
    pub name: String,
    /// Returned exactly once, at creation time.
    #[serde(skip_serializing)]
    pub secret: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NamedCredential {
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Single-use secret proving control of an identity.
#[derive(Clone, Debug, PartialEq)]
pub struct ResetKey(String);

impl ResetKey {
    /// Generate a fresh key.
    pub fn generate() -> Self {
        Self(generate_secret())
    }

    /// Plain secret, as sent to the user.
    pub fn value(&self) -> &str {
        &self.0
    }

    /// Stored representation: the `b'...'` byte-string-literal envelope
    /// kept for compatibility with records written by older deployments.
    pub fn encode(&self) -> String {
        format!("b'{}'", self.0)
    }

    /// Strip the envelope if present, otherwise return the input as-is.
    pub fn decode(raw: &str) -> &str {
        raw.strip_prefix("b'")
            .and_then(|rest| rest.strip_suffix('\''))
            .unwrap_or(raw)
    }

    /// Compare a stored representation with a supplied one. Either side
    /// may or may not carry the envelope.
    pub fn matches(stored: &str, supplied: &str) -> bool {
        let stored = Self::decode(stored);
        !stored.is_empty() && stored == Self::decode(supplied)
    }
}
