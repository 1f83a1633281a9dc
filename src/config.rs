use crate::directory::oidc::OidcSettings;
use crate::quorum::QuorumPolicy;
use chrono::Duration;
use std::env;
use std::time::Duration as StdDuration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a whole number, got \"{value}\"")]
    NotANumber { name: &'static str, value: String },

    #[error("close delay ({close}h) must be longer than reminder delay ({reminder}h)")]
    DelayOrder { reminder: i64, close: i64 },

    #[error("{0} is required")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub discord_token: Option<String>,
    pub announcements_channel: Option<String>,
    pub vote_host: String,
    pub policy: QuorumPolicy,
    pub call_timeout: StdDuration,
    pub oidc: Option<OidcSettings>,
}

impl Config {
    /// Reads configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let reminder_hours = number(&get, "VOTE_REMINDER_DELAY_HOURS", 48)?;
        let close_hours = number(&get, "VOTE_CLOSE_DELAY_HOURS", 72)?;
        if close_hours <= reminder_hours {
            return Err(ConfigError::DelayOrder {
                reminder: reminder_hours,
                close: close_hours,
            });
        }
        let timeout_secs = number(&get, "VOTE_CALL_TIMEOUT_SECS", 10)?;
        let call_timeout = StdDuration::from_secs(timeout_secs.max(1) as u64);

        let oidc = get("VOTE_OIDC_PROVIDER").map(|provider_uri| OidcSettings {
            provider_uri: provider_uri.trim_end_matches('/').to_string(),
            client_id: get("VOTE_OIDC_ID").unwrap_or_default(),
            client_secret: get("VOTE_OIDC_SECRET").unwrap_or_default(),
            active_group_id: get("VOTE_ACTIVE_GROUP_ID").unwrap_or_default(),
            gatekeep_url: get("VOTE_CONDITIONAL_URL").unwrap_or_default(),
            gatekeep_token: get("VOTE_TOKEN").unwrap_or_default(),
            chat_attribute: get("VOTE_CHAT_ATTRIBUTE").unwrap_or_else(|| "discorduid".to_string()),
            request_timeout: call_timeout,
        });

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:house_vote.db".to_string()),
            discord_token: get("DISCORD_TOKEN"),
            announcements_channel: get("VOTE_ANNOUNCEMENTS_CHANNEL_ID"),
            vote_host: get("VOTE_HOST").unwrap_or_else(|| "http://localhost:8080".to_string()),
            policy: QuorumPolicy {
                reminder_delay: Duration::hours(reminder_hours),
                close_delay: Duration::hours(close_hours),
            },
            call_timeout,
            oidc,
        })
    }
}

fn number<G>(get: &G, name: &'static str, default: i64) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value
            .parse::<i64>()
            .ok()
            .filter(|n| *n >= 0)
            .ok_or(ConfigError::NotANumber { name, value }),
    }
}
