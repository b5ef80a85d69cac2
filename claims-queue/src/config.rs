use std::time::Duration;

use crate::error::{ClaimsError, Result};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const DEFAULT_AUTO_REFRESH_SECS: u64 = 15;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Environment variables read by [`ClaimsQueueConfig::from_env`].
pub mod env_keys {
    pub const API_BASE_URL: &str = "SBS_API_URL";
    pub const PAGE_SIZE: &str = "CLAIMS_PAGE_SIZE";
    pub const AUTO_REFRESH_SECS: &str = "CLAIMS_AUTO_REFRESH_SECS";
    pub const REQUEST_TIMEOUT_SECS: &str = "CLAIMS_REQUEST_TIMEOUT_SECS";
}

/// Runtime configuration for the claims queue, injected into the API client and view-model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsQueueConfig {
    /// Base URL of the claims API, without a trailing slash
    pub api_base_url: String,
    /// Number of claims requested per list fetch
    pub page_size: u32,
    /// Page requested on list fetch (1-based)
    pub page: u32,
    /// Period of the silent auto-refresh
    pub auto_refresh_interval: Duration,
    /// Per-request timeout applied by the HTTP client
    pub request_timeout: Duration,
}

impl ClaimsQueueConfig {
    pub fn new(api_base_url: impl AsRef<str>) -> Self {
        Self {
            api_base_url: normalize_base_url(api_base_url.as_ref()),
            ..Self::default()
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_auto_refresh_interval(mut self, interval: Duration) -> Self {
        self.auto_refresh_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(env_keys::API_BASE_URL) {
            let url = normalize_base_url(&url);
            if !url.is_empty() {
                config.api_base_url = url;
            }
        }
        if let Some(raw) = lookup(env_keys::PAGE_SIZE) {
            config.page_size = parse_number(env_keys::PAGE_SIZE, &raw)? as u32;
        }
        if let Some(raw) = lookup(env_keys::AUTO_REFRESH_SECS) {
            config.auto_refresh_interval =
                Duration::from_secs(parse_number(env_keys::AUTO_REFRESH_SECS, &raw)?);
        }
        if let Some(raw) = lookup(env_keys::REQUEST_TIMEOUT_SECS) {
            config.request_timeout =
                Duration::from_secs(parse_number(env_keys::REQUEST_TIMEOUT_SECS, &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.is_empty() {
            return Err(ClaimsError::Config("API base URL is empty".to_string()));
        }
        if self.page_size == 0 {
            return Err(ClaimsError::Config("page size must be positive".to_string()));
        }
        if self.page == 0 {
            return Err(ClaimsError::Config("page numbers start at 1".to_string()));
        }
        if self.auto_refresh_interval.is_zero() {
            return Err(ClaimsError::Config(
                "auto-refresh interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClaimsQueueConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 1,
            auto_refresh_interval: Duration::from_secs(DEFAULT_AUTO_REFRESH_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

/// Trim whitespace and any trailing slashes from a base URL.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| ClaimsError::Config(format!("{} must be a whole number, got {:?}", key, raw)))?;
    if key == env_keys::PAGE_SIZE && value > u32::MAX as u64 {
        return Err(ClaimsError::Config(format!("{} is out of range", key)));
    }
    Ok(value)
}
