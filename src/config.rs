//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Credentials are referenced by env-var name in the config and resolved
//! at runtime via `std::env::var`. Every section has defaults, so an empty
//! file is a valid configuration.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use reqwest::Url;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::handshake::Credentials;
use crate::ledger::DateRange;
use crate::mfa::{MethodSelection, PollPolicy, DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::surfaces::api::DEFAULT_API_BASE;
use crate::surfaces::web::DEFAULT_WEB_BASE;
use crate::surfaces::SurfaceKind;

/// Upper bounds on user-supplied periods.
const MAX_LOOKBACK_DAYS: i64 = 36_500;
const MAX_TIMEOUT_SECS: u64 = 3_600;
const MAX_POLL_INTERVAL_SECS: u64 = 3_600;
const MAX_DEADLINE_SECS: u64 = 86_400;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub endpoints: EndpointsConfig,
    pub mfa: MfaConfig,
    pub credentials: CredentialsConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub surface: SurfaceKind,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceKind::default(),
            user_agent: concat!("bankfetch/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EndpointsConfig {
    pub web_base: String,
    pub api_base: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            web_base: DEFAULT_WEB_BASE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MfaConfig {
    /// 1-based index into the enrolled methods. Unset: latest enrolled.
    pub method_index: Option<usize>,
    pub poll_interval_secs: u64,
    pub poll_attempts: u32,
    /// Overall deadline for the confirmation, from start-up.
    pub deadline_secs: Option<u64>,
}

impl Default for MfaConfig {
    fn default() -> Self {
        Self {
            method_index: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            poll_attempts: DEFAULT_POLL_ATTEMPTS,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CredentialsConfig {
    pub username_env: String,
    pub password_env: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            username_env: "BANKFETCH_USERNAME".to_string(),
            password_env: "BANKFETCH_PASSWORD".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExportConfig {
    /// Explicit start date (`YYYY-MM-DD`). Overrides `lookback_days`.
    pub from: Option<NaiveDate>,
    /// Explicit end date, default today.
    pub to: Option<NaiveDate>,
    pub lookback_days: i64,
    /// Also print skipped rows.
    pub include_skipped: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            lookback_days: 90,
            include_skipped: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mfa.poll_attempts == 0 {
            bail!("mfa.poll_attempts must be at least 1");
        }
        if self.mfa.method_index == Some(0) {
            bail!("mfa.method_index is 1-based");
        }
        if self.export.from.is_none() && !(1..=MAX_LOOKBACK_DAYS).contains(&self.export.lookback_days) {
            bail!("export.lookback_days must be between 1 and {MAX_LOOKBACK_DAYS}");
        }
        if !(1..=MAX_TIMEOUT_SECS).contains(&self.client.timeout_secs) {
            bail!("client.timeout_secs must be between 1 and {MAX_TIMEOUT_SECS}");
        }
        if self.mfa.poll_interval_secs > MAX_POLL_INTERVAL_SECS {
            bail!("mfa.poll_interval_secs must be at most {MAX_POLL_INTERVAL_SECS}");
        }
        if self.mfa.deadline_secs.is_some_and(|secs| secs > MAX_DEADLINE_SECS) {
            bail!("mfa.deadline_secs must be at most {MAX_DEADLINE_SECS}");
        }
        self.base_url()?;
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn credentials(&self) -> Result<Credentials> {
        let username = Self::resolve_env(&self.credentials.username_env)?;
        let password = Self::resolve_env(&self.credentials.password_env)?;
        Ok(Credentials::new(username, password))
    }

    /// Base URL of the configured surface.
    pub fn base_url(&self) -> Result<Url> {
        let raw = match self.client.surface {
            SurfaceKind::Web => &self.endpoints.web_base,
            SurfaceKind::Api => &self.endpoints.api_base,
        };
        Url::parse(raw).with_context(|| format!("Invalid base URL: {raw}"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.client.timeout_secs)
    }

    pub fn method_selection(&self) -> MethodSelection {
        match self.mfa.method_index {
            Some(index) => MethodSelection::Index(index),
            None => MethodSelection::LatestEnrolled,
        }
    }

    /// Poll policy, with the deadline counted from `start`.
    pub fn poll_policy(&self, start: tokio::time::Instant) -> PollPolicy {
        let policy = PollPolicy {
            interval: Duration::from_secs(self.mfa.poll_interval_secs),
            max_attempts: self.mfa.poll_attempts,
            deadline: None,
        };
        match self
            .mfa
            .deadline_secs
            .and_then(|secs| start.checked_add(Duration::from_secs(secs)))
        {
            Some(deadline) => policy.with_deadline(deadline),
            None => policy,
        }
    }

    /// Booking-date range to export, relative to `today`.
    pub fn date_range(&self, today: NaiveDate) -> Result<DateRange> {
        let to = self.export.to.unwrap_or(today);
        let range = match self.export.from {
            Some(from) => DateRange::new(from, to),
            None => DateRange::last_days(to, self.export.lookback_days),
        };
        Ok(range?)
    }
}
