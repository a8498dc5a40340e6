use std::env;
use std::time::Duration;

use crate::followups::RetryPolicy;
use crate::ids::CounterMode;
use crate::registration::{Compensation, RegistrationOptions};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowUpMode {
    #[default]
    Inline,
    Queued,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub table_name: String,
    pub cognito_client_id: String,
    pub cognito_client_secret: String,
    pub cognito_user_pool_id: Option<String>,
    pub follow_up_mode: FollowUpMode,
    pub registration: RegistrationOptions,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| lookup(name).ok_or(ConfigError::Missing(name));

        let counter_mode = match lookup("COUNTER_MODE").as_deref() {
            None | Some("read-then-write") => CounterMode::ReadThenWrite,
            Some("atomic") => CounterMode::Atomic,
            Some(other) => return Err(invalid("COUNTER_MODE", other)),
        };
        let compensation = match lookup("COMPENSATION").as_deref() {
            None | Some("persist-only") => Compensation::PersistOnly,
            Some("all-steps") => Compensation::AllSteps,
            Some(other) => return Err(invalid("COMPENSATION", other)),
        };
        let follow_up_mode = match lookup("FOLLOW_UP_MODE").as_deref() {
            None | Some("inline") => FollowUpMode::Inline,
            Some("queued") => FollowUpMode::Queued,
            Some(other) => return Err(invalid("FOLLOW_UP_MODE", other)),
        };

        let defaults = RetryPolicy::default();
        let max_attempts = match lookup("FOLLOW_UP_MAX_ATTEMPTS") {
            None => defaults.max_attempts,
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => return Err(invalid("FOLLOW_UP_MAX_ATTEMPTS", &raw)),
            },
        };
        let initial_backoff = match lookup("FOLLOW_UP_BACKOFF_MS") {
            None => defaults.initial_backoff,
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| invalid("FOLLOW_UP_BACKOFF_MS", &raw))?,
        };

        Ok(Self {
            table_name: lookup("TABLE_NAME").unwrap_or_else(|| "habitat-digital".to_string()),
            cognito_client_id: required("COGNITO_CLIENT_ID")?,
            cognito_client_secret: required("COGNITO_CLIENT_SECRET")?,
            cognito_user_pool_id: lookup("COGNITO_USER_POOL_ID").filter(|s| !s.is_empty()),
            follow_up_mode,
            registration: RegistrationOptions {
                counter_mode,
                compensation,
                follow_up_retry: RetryPolicy {
                    max_attempts,
                    initial_backoff,
                },
            },
        })
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
    }
}
