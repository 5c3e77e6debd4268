//! CLI-side config resolution: profile + flag overrides → runtime config.

use secrecy::SecretString;

use khidma_config::{Config, Profile};
use khidma_core::{AuthCredentials, MarketplaceConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use khidma_config::{config_path, load_config_or_default, save_config};

/// The profile name to use: flag > config default > "default".
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve a profile into a `MarketplaceConfig`, applying CLI overrides.
pub fn resolve_profile(
    profile: &Profile,
    profile_name: &str,
    global: &GlobalOpts,
) -> Result<MarketplaceConfig, CliError> {
    let mut config = khidma_config::profile_to_marketplace_config(profile, profile_name)?;

    if let Some(ref backend) = global.backend {
        config.url = backend.parse().map_err(|_| CliError::Validation {
            field: "backend".into(),
            reason: format!("invalid URL: {backend}"),
        })?;
    }

    if let Some(ref key) = global.project_key {
        config.project_key = SecretString::from(key.clone());
    }

    if let Some(ref email) = global.email {
        if let AuthCredentials::EmailPassword {
            email: ref mut configured,
            ..
        } = config.auth
        {
            email.clone_into(configured);
        }
    }

    config.timeout = std::time::Duration::from_secs(global.timeout);
    Ok(config)
}

/// Build a `MarketplaceConfig` from the config file, profile, and CLI
/// overrides; falls back to flags/env alone when no profile exists.
pub fn build_marketplace_config(global: &GlobalOpts) -> Result<MarketplaceConfig, CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    if let Some(profile) = cfg.profiles.get(&profile_name) {
        return resolve_profile(profile, &profile_name, global);
    }

    // No profile found -- try flags / env vars alone.
    let backend = global.backend.as_deref().ok_or_else(|| CliError::NoConfig {
        path: config_path().display().to_string(),
    })?;

    let url: url::Url = backend.parse().map_err(|_| CliError::Validation {
        field: "backend".into(),
        reason: format!("invalid URL: {backend}"),
    })?;

    let project_key = global
        .project_key
        .clone()
        .map(SecretString::from)
        .ok_or_else(|| CliError::NoCredentials {
            profile: profile_name.clone(),
        })?;

    let email = global
        .email
        .clone()
        .ok_or_else(|| CliError::NoCredentials {
            profile: profile_name.clone(),
        })?;

    let password = std::env::var("KHIDMA_PASSWORD")
        .map(SecretString::from)
        .map_err(|_| CliError::NoCredentials {
            profile: profile_name,
        })?;

    Ok(MarketplaceConfig {
        url,
        project_key,
        auth: AuthCredentials::EmailPassword { email, password },
        timeout: std::time::Duration::from_secs(global.timeout),
        ..MarketplaceConfig::default()
    })
}
