//! Runtime sync configuration.
//!
//! Values come from the environment (or any lookup closure, for tests). The
//! Supabase URL and anon key are configured together or not at all; cloud
//! sync defaults to on exactly when they are present.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::models::Role;
use crate::queue::{RetryPolicy, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS};
use crate::util::{is_http_url, normalize_text_option};

/// Default interval between background queue drains
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Supabase project endpoint and public key
#[derive(Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

/// Sync settings consumed by the sync client, queue and CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub cloud_sync_enabled: bool,
    pub supabase: Option<SupabaseConfig>,
    pub retry: RetryPolicy,
    pub sync_interval: Duration,
    pub role: Option<Role>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            cloud_sync_enabled: true,
            supabase: None,
            retry: RetryPolicy::default(),
            sync_interval: DEFAULT_SYNC_INTERVAL,
            role: None,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let supabase = parse_supabase_config(&lookup)?;

        let cloud_sync_enabled = match optional_trimmed(&lookup, "CHALK_CLOUD_SYNC_ENABLED") {
            Some(value) => parse_bool(&value).ok_or_else(|| {
                ConfigError::Invalid(
                    "CHALK_CLOUD_SYNC_ENABLED must be true/false, 1/0, yes/no or on/off"
                        .to_string(),
                )
            })?,
            None => supabase.is_some(),
        };
        if cloud_sync_enabled && supabase.is_none() {
            return Err(ConfigError::MissingVar("SUPABASE_URL"));
        }

        let max_attempts = parse_in_range(
            &lookup,
            "CHALK_SYNC_MAX_ATTEMPTS",
            u64::from(DEFAULT_MAX_ATTEMPTS),
            1..=32,
        )?;
        let initial_delay_ms = parse_in_range(
            &lookup,
            "CHALK_SYNC_INITIAL_RETRY_DELAY_MS",
            u64::try_from(DEFAULT_INITIAL_DELAY.as_millis()).unwrap_or(1_000),
            10..=600_000,
        )?;
        let interval_secs = parse_in_range(
            &lookup,
            "CHALK_SYNC_INTERVAL_SECS",
            DEFAULT_SYNC_INTERVAL.as_secs(),
            5..=86_400,
        )?;

        let role = optional_trimmed(&lookup, "CHALK_ROLE")
            .map(|value| value.parse::<Role>().map_err(ConfigError::Invalid))
            .transpose()?;

        Ok(Self {
            cloud_sync_enabled,
            supabase,
            retry: RetryPolicy {
                max_attempts: u32::try_from(max_attempts).unwrap_or(DEFAULT_MAX_ATTEMPTS),
                initial_delay: Duration::from_millis(initial_delay_ms),
                ..RetryPolicy::default()
            },
            sync_interval: Duration::from_secs(interval_secs),
            role,
        })
    }
}

fn parse_supabase_config(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Option<SupabaseConfig>, ConfigError> {
    let url = normalize_text_option(lookup("SUPABASE_URL"));
    let anon_key = normalize_text_option(lookup("SUPABASE_ANON_KEY"));

    match (url, anon_key) {
        (None, None) => Ok(None),
        (Some(url), Some(anon_key)) => {
            if !is_http_url(&url) {
                return Err(ConfigError::Invalid(
                    "SUPABASE_URL must start with http:// or https://".to_string(),
                ));
            }
            Ok(Some(SupabaseConfig {
                url: url.trim_end_matches('/').to_string(),
                anon_key,
            }))
        }
        (Some(_), None) => Err(ConfigError::MissingVar("SUPABASE_ANON_KEY")),
        (None, Some(_)) => Err(ConfigError::MissingVar("SUPABASE_URL")),
    }
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
