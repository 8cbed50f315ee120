//! Configuration manager for the passwordless API.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name, used as email subject prefix.
    pub name: String,
    /// Domain name of current instance.
    pub url: String,
    support: Option<String>,
    /// Linked from the welcome email.
    pub guidelines: Option<String>,
    /// Linked from the welcome email.
    pub policies: Option<String>,
    #[serde(default)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Per-identity exponential backoff on reset-key requests.
    #[serde(default, skip_serializing)]
    pub throttle: Throttle,
    /// Platform-wide sliding window on account creation.
    #[serde(default, skip_serializing)]
    pub quota: Quota,
    /// API token issuance values.
    #[serde(default, skip_serializing)]
    pub token: Token,
}

/// Exponential-backoff configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Throttle {
    /// Wait `base^attempts` seconds between requests.
    pub base: u32,
    /// Cap on the exponent so the wait stays inside `u64`.
    pub max_attempts: u32,
}

impl Default for Throttle {
    fn default() -> Self {
        Self {
            base: 3,
            max_attempts: 20,
        }
    }
}

/// Account-creation quota configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Quota {
    /// Sliding window length in seconds.
    pub window_seconds: u64,
    /// Maximum creations inside one window.
    pub max_creations: usize,
}

impl Default for Quota {
    fn default() -> Self {
        Self {
            window_seconds: 600,
            max_creations: 10,
        }
    }
}

/// API token configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Token lifetime, expressed in `default_unit`s.
    pub default_lifetime: i64,
    /// Lifetime unit in seconds.
    pub default_unit: i64,
    /// Name of the one long-lived token each account holds.
    pub reserved_name: String,
}

impl Default for Token {
    fn default() -> Self {
        Self {
            default_lifetime: 3,
            default_unit: 86_400,
            reserved_name: "main".to_owned(),
        }
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Normalizes a URL string by ensuring it starts with a valid scheme
    /// (`http` or `https`).
    fn normalize_url(&self, url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("https://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string())
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Result<Arc<Self>, url::ParseError> {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(file_path) {
            Ok(file) => {
                let mut config: Configuration =
                    match serde_yaml::from_reader(file) {
                        Ok(config) => config,
                        Err(err) => {
                            return Ok(Arc::new(self.error(err)));
                        },
                    };

                // set app version.
                config.version = VERSION.to_owned();

                // normalize URLs.
                config.url = self.normalize_url(&config.url)?;
                config.guidelines = config
                    .guidelines
                    .map(|g| self.normalize_url(&g))
                    .transpose()?;
                config.policies = config
                    .policies
                    .map(|p| self.normalize_url(&p))
                    .transpose()?;

                Ok(Arc::new(config))
            },
            Err(err) => Ok(Arc::new(self.error(err))),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found");
        Self {
            version: VERSION.to_owned(),
            ..Default::default()
        }
    }
}
