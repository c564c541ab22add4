//! CLI-side configuration: merges the config file, the active profile and
//! command-line overrides into what a session needs.

use std::io::IsTerminal;

use areawatch_config::{Config, ConfigError, Profile};
use areawatch_core::{AuthCredential, SessionConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Everything needed to open and authenticate a session.
pub struct Target {
    pub profile_name: String,
    pub session: SessionConfig,
    pub credential: AuthCredential,
}

impl Target {
    pub fn endpoint(&self) -> String {
        self.session.url.to_string()
    }
}

/// Build the session target from the config file, profile and CLI overrides.
pub fn resolve_target(global: &GlobalOpts) -> Result<Target, CliError> {
    let cfg = areawatch_config::load_config()?;
    let profile_name = cfg.active_profile_name(global.profile.as_deref());
    let profile = select_profile(&cfg, &profile_name, global.profile.is_some())?;

    let session = session_config(profile.clone(), &cfg, global)?;
    let credential = resolve_credential(&profile_name, global.token.as_deref(), || {
        areawatch_config::resolve_token(&profile, &profile_name)
    })?;

    Ok(Target {
        profile_name,
        session,
        credential,
    })
}

/// The named profile; a missing default profile is fine when flags carry
/// the endpoint, a missing explicitly requested one is not.
fn select_profile(cfg: &Config, name: &str, explicit: bool) -> Result<Profile, CliError> {
    match cfg.profile(name) {
        Ok(profile) => Ok(profile.clone()),
        Err(_) if !explicit => Ok(Profile::default()),
        Err(_) => Err(CliError::ProfileNotFound {
            name: name.into(),
            available: available_profiles(cfg),
        }),
    }
}

pub fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<_> = cfg.profiles.keys().cloned().collect();
    if names.is_empty() {
        return "(none)".into();
    }
    names.sort();
    names.join(", ")
}

fn session_config(
    mut profile: Profile,
    cfg: &Config,
    global: &GlobalOpts,
) -> Result<SessionConfig, CliError> {
    // Endpoint: flag > env > profile
    if let Some(ref endpoint) = global.endpoint {
        profile.endpoint.clone_from(endpoint);
    }
    if profile.endpoint.trim().is_empty() {
        return Err(CliError::NoConfig {
            path: areawatch_config::config_path().display().to_string(),
        });
    }
    Ok(areawatch_config::profile_to_session_config(
        &profile,
        &cfg.defaults,
    )?)
}

/// Token: `--token` flag, then the profile's credential chain, then an
/// interactive prompt when stdin is a terminal.
fn resolve_credential(
    profile_name: &str,
    flag: Option<&str>,
    chain: impl FnOnce() -> Result<secrecy::SecretString, ConfigError>,
) -> Result<AuthCredential, CliError> {
    if let Some(token) = flag {
        return Ok(AuthCredential::new(token));
    }
    match chain() {
        Ok(secret) => Ok(AuthCredential::from(secret)),
        Err(ConfigError::NoCredentials { profile }) if std::io::stdin().is_terminal() => {
            let token = rpassword::prompt_password(format!("Token for profile '{profile}': "))?;
            if token.is_empty() {
                return Err(CliError::NoCredentials {
                    profile: profile_name.into(),
                });
            }
            Ok(AuthCredential::new(token))
        }
        Err(e) => Err(e.into()),
    }
}
