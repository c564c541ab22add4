//! Config subcommand handlers.

use dialoguer::{Confirm, Input, Select};

use areawatch_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::available_profiles;
use crate::error::CliError;
use crate::output;

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Where `config init` puts the token.
enum TokenStorage {
    Keyring,
    EnvVar(String),
    Plaintext,
    Prompt,
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),
        ConfigCommand::Show => {
            let cfg = redacted(areawatch_config::load_config()?);
            let out = output::render_single(global.output, &cfg, |c| {
                toml::to_string_pretty(c).unwrap_or_else(|e| format!("<unprintable config: {e}>"))
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", areawatch_config::config_path().display());
            Ok(())
        }
        ConfigCommand::SetToken { profile } => set_token(profile, global),
    }
}

// ── Init: interactive wizard ────────────────────────────────────────

fn init() -> Result<(), CliError> {
    let config_path = areawatch_config::config_path();
    eprintln!("areawatch configuration wizard");
    eprintln!("   Config path: {}\n", config_path.display());

    let mut cfg = areawatch_config::load_config_or_default();

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    if cfg.profiles.contains_key(&profile_name)
        && !Confirm::new()
            .with_prompt(format!("Overwrite existing profile '{profile_name}'?"))
            .default(false)
            .interact()
            .map_err(prompt_err)?
    {
        eprintln!("Aborted, nothing written.");
        return Ok(());
    }

    let endpoint: String = Input::new()
        .with_prompt("Server endpoint")
        .default("ws://localhost:4000/ws".into())
        .validate_with(|input: &String| {
            areawatch_config::parse_endpoint(input)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(prompt_err)?;

    let storage = match Select::new()
        .with_prompt("Where should the token come from?")
        .items(&[
            "System keyring (recommended)",
            "Environment variable",
            "Config file (plaintext)",
            "Ask every time",
        ])
        .default(0)
        .interact()
        .map_err(prompt_err)?
    {
        0 => TokenStorage::Keyring,
        1 => TokenStorage::EnvVar(
            Input::new()
                .with_prompt("Variable name")
                .default("AREAWATCH_TOKEN".into())
                .interact_text()
                .map_err(prompt_err)?,
        ),
        2 => TokenStorage::Plaintext,
        _ => TokenStorage::Prompt,
    };

    let mut profile = Profile {
        endpoint,
        ..Profile::default()
    };
    match storage {
        TokenStorage::Keyring => {
            let token = read_token()?;
            areawatch_config::store_token(&profile_name, &token)?;
            eprintln!("   Token stored in system keyring");
        }
        TokenStorage::EnvVar(var) => profile.token_env = Some(var),
        TokenStorage::Plaintext => profile.token = Some(read_token()?),
        TokenStorage::Prompt => {}
    }

    cfg.profiles.insert(profile_name.clone(), profile);
    if cfg.profiles.len() == 1 {
        cfg.default_profile = Some(profile_name.clone());
    }
    areawatch_config::save_config(&cfg)?;

    eprintln!("\nConfiguration written to {}", config_path.display());
    eprintln!("  Profile: {profile_name}");
    eprintln!("\n  Test it: areawatch --profile {profile_name} search Brazil");
    Ok(())
}

fn read_token() -> Result<String, CliError> {
    let token = rpassword::prompt_password("Token: ").map_err(prompt_err)?;
    if token.is_empty() {
        return Err(CliError::Validation {
            field: "token".into(),
            reason: "token cannot be empty".into(),
        });
    }
    Ok(token)
}

// ── SetToken ────────────────────────────────────────────────────────

fn set_token(profile: Option<String>, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = areawatch_config::load_config_or_default();
    let profile_name = profile.unwrap_or_else(|| cfg.active_profile_name(global.profile.as_deref()));

    if !cfg.profiles.contains_key(&profile_name) {
        return Err(CliError::ProfileNotFound {
            name: profile_name,
            available: available_profiles(&cfg),
        });
    }

    let token = read_token()?;
    areawatch_config::store_token(&profile_name, &token)?;
    eprintln!("Token stored in system keyring for profile '{profile_name}'");
    Ok(())
}

// ── Show ────────────────────────────────────────────────────────────

/// Mask plaintext tokens before printing.
fn redacted(mut cfg: Config) -> Config {
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some("********".into());
        }
    }
    cfg
}
