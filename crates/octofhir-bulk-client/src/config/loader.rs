//! Settings file loading.
//!
//! Settings come from a TOML file plus `OCTOFHIR_BULK__*` environment
//! variables, e.g. `OCTOFHIR_BULK__CLIENT__CLIENT_ID=my-client` or
//! `OCTOFHIR_BULK__EXPORT__POLL_INTERVAL=10s`. Environment values win.
//!
//! ```toml
//! [client]
//! token_endpoint = "https://auth.example.com/token"
//! client_id = "bulk-client"
//! requires_auth = true
//! request_timeout = "30s"
//!
//! [client.private_key]
//! alg = "ES384"
//! kid = "key-1"
//! pem_file = "keys/bulk-client.pem"
//!
//! [export]
//! url = "https://fhir.example.com/$export"
//! poll_interval = "5s"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use super::{ClientConfig, DEFAULT_POLL_INTERVAL, ExportOptions};
use crate::auth::{PrivateKey, SigningAlgorithm};
use crate::error::BulkError;

/// Environment variable prefix for settings overrides.
pub const ENV_PREFIX: &str = "OCTOFHIR_BULK";

/// Settings file looked up in the working directory when no path is given.
pub const DEFAULT_SETTINGS_FILE: &str = "octofhir-bulk.toml";

/// Top-level settings document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BulkSettings {
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub export: ExportSettings,
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Directory relative key file paths resolve against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub token_endpoint: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_true")]
    pub strict_ssl: bool,
    #[serde(default)]
    pub requires_auth: bool,
    /// Per-request timeout applied by the HTTP transport.
    #[serde(default, with = "humantime_serde")]
    pub request_timeout: Option<Duration>,
    #[serde(default)]
    pub private_key: Option<KeySettings>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            token_endpoint: String::new(),
            client_id: String::new(),
            strict_ssl: true,
            requires_auth: false,
            request_timeout: None,
            private_key: None,
        }
    }
}

/// Where to find the signing key. Exactly one of `pem`, `pem_file` and
/// `jwk_file` must be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeySettings {
    /// Signing algorithm. Required for PEM keys.
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub kid: Option<String>,
    /// Inline PKCS#8 PEM document.
    #[serde(default, skip_serializing)]
    pub pem: Option<String>,
    #[serde(default)]
    pub pem_file: Option<PathBuf>,
    /// File holding a private JWK.
    #[serde(default)]
    pub jwk_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportSettings {
    /// `$export` endpoint to kick off.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(default)]
    pub max_poll_attempts: Option<u32>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            url: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

fn default_log_level() -> String {
    "info".to_string()
}

impl BulkSettings {
    /// Checks the settings for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`BulkError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<(), BulkError> {
        let level = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&level.as_str()) {
            return Err(BulkError::config(format!(
                "logging.level must be one of {valid_levels:?}"
            )));
        }
        if self.export.poll_interval.is_zero() {
            return Err(BulkError::config("export.poll_interval must be > 0"));
        }
        if self.export.max_poll_attempts == Some(0) {
            return Err(BulkError::config("export.max_poll_attempts must be > 0"));
        }
        if let Some(url) = &self.export.url
            && url::Url::parse(url).is_err()
        {
            return Err(BulkError::config(format!(
                "export.url is not a valid URL: {url}"
            )));
        }
        if let Some(key) = &self.client.private_key {
            let sources = [key.pem.is_some(), key.pem_file.is_some(), key.jwk_file.is_some()];
            if sources.iter().filter(|set| **set).count() != 1 {
                return Err(BulkError::config(
                    "client.private_key needs exactly one of pem, pem_file, jwk_file",
                ));
            }
            if let Some(alg) = &key.alg {
                alg.parse::<SigningAlgorithm>()?;
            }
        }
        if self.client.requires_auth {
            if self.client.private_key.is_none() {
                return Err(BulkError::config(
                    "client.requires_auth=true requires client.private_key",
                ));
            }
            if self.client.client_id.is_empty() || self.client.token_endpoint.is_empty() {
                return Err(BulkError::config(
                    "client.requires_auth=true requires client.client_id and client.token_endpoint",
                ));
            }
        }
        Ok(())
    }

    /// Polling options from the `[export]` section.
    #[must_use]
    pub fn export_options(&self) -> ExportOptions {
        ExportOptions {
            poll_interval: self.export.poll_interval,
            max_poll_attempts: self.export.max_poll_attempts,
        }
    }

    /// Builds the session configuration, reading key files from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if a key file cannot be read or parsed.
    pub fn client_config(&self) -> Result<ClientConfig, BulkError> {
        let private_key = self
            .client
            .private_key
            .as_ref()
            .map(|key| self.load_key(key))
            .transpose()?;

        let config = ClientConfig {
            token_endpoint: self.client.token_endpoint.clone(),
            client_id: self.client.client_id.clone(),
            private_key,
            strict_ssl: self.client.strict_ssl,
            requires_auth: self.client.requires_auth,
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_file(&self, path: &Path) -> Result<String, BulkError> {
        let path = self.resolve(path);
        fs::read_to_string(&path).map_err(|e| {
            BulkError::config(format!("failed to read key file {}: {e}", path.display()))
        })
    }

    fn load_key(&self, key: &KeySettings) -> Result<PrivateKey, BulkError> {
        let alg = key
            .alg
            .as_deref()
            .map(str::parse::<SigningAlgorithm>)
            .transpose()?;

        if let Some(jwk_file) = &key.jwk_file {
            let json = self.read_file(jwk_file)?;
            return Ok(PrivateKey::from_jwk_json(&json, alg, key.kid.clone())?);
        }

        let pem = match (&key.pem, &key.pem_file) {
            (Some(pem), _) => pem.clone(),
            (None, Some(pem_file)) => self.read_file(pem_file)?,
            (None, None) => {
                return Err(BulkError::config(
                    "client.private_key needs one of pem, pem_file, jwk_file",
                ));
            }
        };
        let alg = alg.ok_or_else(|| {
            BulkError::config("client.private_key.alg is required for PEM keys")
        })?;
        Ok(PrivateKey::from_pem(alg, key.kid.clone(), pem))
    }
}

/// Loads settings from `path` (or [`DEFAULT_SETTINGS_FILE`] if present) and
/// the environment, then validates them.
///
/// A missing file is not an error; environment variables alone may carry the
/// whole configuration.
///
/// # Errors
///
/// Returns [`BulkError::Config`] if the sources cannot be parsed or fail
/// validation.
pub fn load_settings(path: Option<&Path>) -> Result<BulkSettings, BulkError> {
    let mut builder = Config::builder();
    let file = path
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), Path::to_path_buf);
    let file = file.exists().then_some(file);

    if let Some(file) = &file {
        builder = builder.add_source(File::from(file.clone()));
    }
    // Environment variable overrides, e.g., OCTOFHIR_BULK__CLIENT__CLIENT_ID=abc
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );

    let cfg = builder
        .build()
        .map_err(|e| BulkError::config(format!("config build error: {e}")))?;
    let mut settings: BulkSettings = cfg
        .try_deserialize()
        .map_err(|e| BulkError::config(format!("config deserialize error: {e}")))?;

    settings.base_dir = file
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf);
    settings.validate()?;

    tracing::debug!(
        file = ?file,
        requires_auth = settings.client.requires_auth,
        "Loaded bulk client settings"
    );
    Ok(settings)
}
