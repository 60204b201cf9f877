//! # rd-config
//!
//! Layered settings: built-in defaults, then an optional TOML file, then
//! `RD__`-prefixed environment variables (`RD__DATABASE__URL`,
//! `RD__DISCUSSION__SELF_VOTE`, ...). A `.env` file is read first.

use config::{Config, Environment, File, FileFormat, Source};
use rd_core::policy::{DiscussionPolicy, SelfVotePolicy};
use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// Overrides the settings file location.
pub const CONFIG_PATH_VAR: &str = "RD_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "rusty-discuss.toml";
pub const DEFAULT_DATABASE_URL: &str = "sqlite:rusty_discuss.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub discussion: DiscussionSettings,
    pub log: LogSettings,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseSettings {
    /// May carry credentials for a remote store; never logged.
    pub url: SecretString,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscussionSettings {
    pub inline_depth: usize,
    pub thread_depth: usize,
    pub self_vote: SelfVotePolicy,
    pub new_account_days: i64,
    pub vote_retry_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// `EnvFilter` directive; `RUST_LOG` wins when set.
    pub filter: String,
    pub json: bool,
}

impl Settings {
    /// Reads `.env`, then the settings file named by `RD_CONFIG` (or
    /// `rusty-discuss.toml`), then the process environment.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        debug!(%path, "loading settings");
        Self::from_sources(File::with_name(&path).required(false), Self::environment())
    }

    /// Same layering as [`Settings::load`] with the file given inline.
    pub fn from_toml(toml: &str, env: Environment) -> Result<Self> {
        Self::from_sources(File::from_str(toml, FileFormat::Toml), env)
    }

    pub fn environment() -> Environment {
        Environment::with_prefix("RD")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn from_sources<F>(file: F, env: Environment) -> Result<Self>
    where
        F: Source + Send + Sync + 'static,
    {
        let defaults = DiscussionPolicy::default();
        let settings: Settings = Config::builder()
            .set_default("database.url", DEFAULT_DATABASE_URL)?
            .set_default("database.max_connections", 5_i64)?
            .set_default("discussion.inline_depth", defaults.inline_depth as i64)?
            .set_default("discussion.thread_depth", defaults.thread_depth as i64)?
            .set_default("discussion.self_vote", "reject")?
            .set_default("discussion.new_account_days", defaults.new_account_days)?
            .set_default("discussion.vote_retry_limit", i64::from(defaults.vote_retry_limit))?
            .set_default("log.filter", "info")?
            .set_default("log.json", false)?
            .add_source(file)
            .add_source(env)
            .build()?
            .try_deserialize()?;

        if settings.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".into()));
        }
        settings.policy()?;
        Ok(settings)
    }

    /// The `discussion` section as a validated core policy.
    pub fn policy(&self) -> Result<DiscussionPolicy> {
        let d = &self.discussion;
        if d.thread_depth == 0 {
            return Err(ConfigError::Invalid("discussion.thread_depth must be at least 1".into()));
        }
        if d.vote_retry_limit == 0 {
            return Err(ConfigError::Invalid("discussion.vote_retry_limit must be at least 1".into()));
        }
        if d.new_account_days < 0 {
            return Err(ConfigError::Invalid("discussion.new_account_days must not be negative".into()));
        }
        Ok(DiscussionPolicy {
            inline_depth: d.inline_depth,
            thread_depth: d.thread_depth,
            self_vote: d.self_vote,
            new_account_days: d.new_account_days,
            vote_retry_limit: d.vote_retry_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::environment().source(Some(map))
    }

    #[test]
    fn defaults_match_the_core_policy() {
        let settings = Settings::from_toml("", env(&[])).unwrap();
        assert_eq!(settings.database.url.expose_secret(), DEFAULT_DATABASE_URL);
        assert_eq!(settings.database.max_connections, 5);
        assert_eq!(settings.log.filter, "info");
        assert!(!settings.log.json);
        assert_eq!(settings.policy().unwrap(), DiscussionPolicy::default());
    }

    #[test]
    fn file_then_environment_override() {
        let toml = r#"
            [discussion]
            self_vote = "allow"
            inline_depth = 2

            [log]
            json = true
        "#;
        let settings = Settings::from_toml(toml, env(&[("RD__DISCUSSION__INLINE_DEPTH", "5")])).unwrap();
        let policy = settings.policy().unwrap();
        assert_eq!(policy.self_vote, SelfVotePolicy::Allow);
        assert_eq!(policy.inline_depth, 5);
        assert_eq!(policy.thread_depth, 10);
        assert!(settings.log.json);
    }

    #[test]
    fn zero_retry_limit_is_rejected() {
        let err = Settings::from_toml("[discussion]\nvote_retry_limit = 0\n", env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_self_vote_policy_fails_to_load() {
        let err = Settings::from_toml("[discussion]\nself_vote = \"sometimes\"\n", env(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
