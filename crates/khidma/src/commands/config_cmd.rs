//! `khidma config` -- profile management.

use khidma_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{config_path, load_config_or_default, save_config};
use crate::error::CliError;
use crate::output::print_output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init {
            backend,
            email,
            project_key,
            name,
        } => init(&backend, &email, project_key, &name, global),
        ConfigCommand::Show => show(global),
        ConfigCommand::Path => {
            print_output(&config_path().display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::SetPassword { name } => set_password(&name, global),
    }
}

fn init(
    backend: &str,
    email: &str,
    project_key: Option<String>,
    name: &str,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    // Validate before writing anything.
    let _: url::Url = backend.parse().map_err(|_| CliError::Validation {
        field: "backend".into(),
        reason: format!("invalid URL: {backend}"),
    })?;

    let mut cfg: Config = load_config_or_default();

    cfg.profiles.insert(
        name.to_owned(),
        Profile {
            backend: backend.to_owned(),
            project_key,
            project_key_env: Some("KHIDMA_PROJECT_KEY".into()),
            email: Some(email.to_owned()),
            password: None,
            timeout: None,
        },
    );
    if cfg.default_profile.is_none() {
        cfg.default_profile = Some(name.to_owned());
    }

    save_config(&cfg)?;
    print_output(
        &format!("profile '{name}' written to {}", config_path().display()),
        global.quiet,
    );
    print_output(
        "store your password with: khidma config set-password",
        global.quiet,
    );
    Ok(())
}

fn show(global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = load_config_or_default();

    // Redact plaintext secrets before echoing the file back.
    let mut redacted = cfg;
    for profile in redacted.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some("<redacted>".into());
        }
        if profile.project_key.is_some() {
            profile.project_key = Some("<redacted>".into());
        }
    }

    let text = toml::to_string_pretty(&redacted).map_err(khidma_config::ConfigError::from)?;
    print_output(&text, global.quiet);
    Ok(())
}

fn set_password(name: &str, global: &GlobalOpts) -> Result<(), CliError> {
    let password = rpassword::prompt_password(format!("password for profile '{name}': "))?;
    if password.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "password must not be empty".into(),
        });
    }

    khidma_config::store_password(name, &password)?;
    print_output("password stored in system keyring", global.quiet);
    Ok(())
}
