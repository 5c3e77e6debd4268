//! Shared configuration for the Khidma CLI.
//!
//! TOML profiles, credential resolution (keyring + env + plaintext),
//! and translation to `khidma_core::MarketplaceConfig`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use khidma_core::{AuthCredentials, MarketplaceConfig};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("no project key configured for profile '{profile}'")]
    NoProjectKey { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Enable the live changefeed for watch-style commands.
    #[serde(default = "default_live")]
    pub live: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
            live: default_live(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_live() -> bool {
    true
}

/// A named backend profile.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Backend project URL (e.g., "https://proj.khidma.app").
    pub backend: String,

    /// Project (anon) key (plaintext — prefer keyring or env var).
    pub project_key: Option<String>,

    /// Environment variable name containing the project key.
    pub project_key_env: Option<String>,

    /// Sign-in email.
    pub email: Option<String>,

    /// Sign-in password (plaintext — prefer keyring).
    pub password: Option<String>,

    /// Override timeout.
    pub timeout: Option<u64>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("app", "khidma", "khidma").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("khidma");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = config_path();

    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("KHIDMA_").split("_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(&path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the project key from the credential chain.
pub fn resolve_project_key(
    profile: &Profile,
    profile_name: &str,
) -> Result<SecretString, ConfigError> {
    // 1. Profile's project_key_env → env var lookup
    if let Some(ref env_name) = profile.project_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Ok(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new("khidma", &format!("{profile_name}/project-key")) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref key) = profile.project_key {
        return Ok(SecretString::from(key.clone()));
    }

    Err(ConfigError::NoProjectKey {
        profile: profile_name.into(),
    })
}

/// Resolve sign-in credentials (email + password).
pub fn resolve_credentials(
    profile: &Profile,
    profile_name: &str,
) -> Result<(String, SecretString), ConfigError> {
    let email = profile
        .email
        .clone()
        .or_else(|| std::env::var("KHIDMA_EMAIL").ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    // 1. Env var
    if let Ok(pw) = std::env::var("KHIDMA_PASSWORD") {
        return Ok((email, SecretString::from(pw)));
    }

    // 2. Keyring
    if let Ok(entry) = keyring::Entry::new("khidma", &format!("{profile_name}/password")) {
        if let Ok(pw) = entry.get_password() {
            return Ok((email, SecretString::from(pw)));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok((email, SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store a password in the system keyring for a profile.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new("khidma", &format!("{profile_name}/password")).map_err(|e| {
        ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        }
    })?;
    entry
        .set_password(password)
        .map_err(|e| ConfigError::Validation {
            field: "keyring".into(),
            reason: e.to_string(),
        })
}

// ── Translation to runtime config ───────────────────────────────────

/// Build a `MarketplaceConfig` from a profile.
pub fn profile_to_marketplace_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<MarketplaceConfig, ConfigError> {
    let url: url::Url = profile
        .backend
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "backend".into(),
            reason: format!("invalid URL: {}", profile.backend),
        })?;

    let project_key = resolve_project_key(profile, profile_name)?;
    let (email, password) = resolve_credentials(profile, profile_name)?;

    Ok(MarketplaceConfig {
        url,
        project_key,
        auth: AuthCredentials::EmailPassword { email, password },
        timeout: Duration::from_secs(profile.timeout.unwrap_or(30)),
        ..MarketplaceConfig::default()
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile {
            backend: "https://proj.khidma.app".into(),
            project_key: Some("anon-key".into()),
            project_key_env: None,
            email: Some("amina@example.com".into()),
            password: Some("secret".into()),
            timeout: Some(10),
        }
    }

    #[test]
    fn profile_translates_to_marketplace_config() {
        let config = profile_to_marketplace_config(&profile(), "default").expect("config");
        assert_eq!(config.url.as_str(), "https://proj.khidma.app/");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.changefeed_enabled);
    }

    #[test]
    fn missing_backend_url_is_rejected() {
        let mut p = profile();
        p.backend = "not a url".into();
        assert!(matches!(
            profile_to_marketplace_config(&p, "default"),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn missing_credentials_are_reported() {
        let mut p = profile();
        p.email = None;
        // Ensure env fallback doesn't rescue the test environment.
        if std::env::var("KHIDMA_EMAIL").is_ok() {
            return;
        }
        assert!(matches!(
            resolve_credentials(&p, "default"),
            Err(ConfigError::NoCredentials { .. })
        ));
    }

    #[test]
    fn toml_round_trip_preserves_profiles() {
        let mut cfg = Config::default();
        cfg.profiles.insert("prod".into(), profile());

        let text = toml::to_string_pretty(&cfg).expect("serialize");
        let parsed: Config = toml::from_str(&text).expect("parse");
        assert!(parsed.profiles.contains_key("prod"));
        assert_eq!(parsed.default_profile.as_deref(), Some("default"));
    }
}
