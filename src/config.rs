use std::{env, net::IpAddr, path::PathBuf, str::FromStr};
use tokio::time::Duration;

use crate::{
    error::{Error, Result},
    provider::Provider,
};

/// get a configuration from the environment or return default value
pub(crate) fn parse_env_var<T: FromStr>(name: &'static str, default: T) -> T {
    env::var(name)
        .unwrap_or_default()
        .parse::<T>()
        .unwrap_or(default)
}

fn required_env_var(name: &'static str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::Config(name)),
    }
}

/// retry and pacing knobs of the dispatch pipeline
#[derive(Clone, Debug)]
pub struct DispatchPolicy {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_pause: Duration::from_secs(60),
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl DispatchPolicy {
    /// delay before the attempt following failed attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub http_host: IpAddr,
    pub http_port: u16,
    pub username: String,
    pub password: String,
    pub session_ttl: Duration,
    pub reset_lock: Duration,
    pub provider: Provider,
    pub hourly_cap: u32,
    pub footer: Option<String>,
    pub public_dir: PathBuf,
    pub policy: DispatchPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let provider = match env::var("SMTP_PROVIDER") {
            Ok(name) if name.eq_ignore_ascii_case("custom") => Provider::Custom {
                host: required_env_var("SMTP_RELAY_HOST")?,
                port: parse_env_var("SMTP_RELAY_PORT", 587),
            },
            Ok(name) if !name.is_empty() => name.parse()?,
            _ => Provider::Zoho,
        };

        let footer = env::var("MAIL_FOOTER").ok().filter(|f| !f.trim().is_empty());

        Ok(Self {
            http_host: parse_env_var("HTTP_HOST", [127, 0, 0, 1].into()),
            http_port: parse_env_var("HTTP_PORT", 8080),
            username: required_env_var("LAUNCHER_USERNAME")?,
            password: required_env_var("LAUNCHER_PASSWORD")?,
            session_ttl: Duration::from_secs(parse_env_var("SESSION_TTL_SECS", 3600)),
            reset_lock: Duration::from_millis(parse_env_var("RESET_LOCK_MS", 2000)),
            provider,
            hourly_cap: parse_env_var("HOURLY_CAP", 15),
            footer,
            public_dir: parse_env_var("PUBLIC_DIR", PathBuf::from("public")),
            policy: DispatchPolicy {
                // zero would stall the pipeline, clamp to one
                batch_size: parse_env_var("BATCH_SIZE", 5usize).max(1),
                batch_pause: Duration::from_millis(parse_env_var("BATCH_PAUSE_MS", 60_000)),
                max_attempts: parse_env_var("MAX_ATTEMPTS", 3u32).max(1),
                backoff_base: Duration::from_millis(parse_env_var("BACKOFF_BASE_MS", 1000)),
            },
        })
    }
}
