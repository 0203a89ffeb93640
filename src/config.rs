//! read client configuration from explicit values, a file, or the environment

use std::time::Duration;

use crate::errors::Error;

/// Seconds before token expiry at which the proactive refresh fires.
pub const DEFAULT_REFRESH_MARGIN_SECS: u64 = 10;

const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

#[derive(Clone, serde::Deserialize)]
pub struct Config {
    /// Base URL of the API, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Path of the refresh endpoint, joined onto `base_url`.
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_refresh_margin_secs")]
    pub refresh_margin_secs: u64,
    /// Access token carried over from a previous session, if any.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_refresh_path() -> String {
    DEFAULT_REFRESH_PATH.to_string()
}

fn default_refresh_margin_secs() -> u64 {
    DEFAULT_REFRESH_MARGIN_SECS
}

impl Config {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: default_refresh_path(),
            refresh_margin_secs: DEFAULT_REFRESH_MARGIN_SECS,
            access_token: None,
        }
    }

    pub fn from_file(path: &str) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn from_env() -> Result<Self, Error> {
        Ok(Self {
            base_url: std::env::var("ADMIN_API_URL")
                .map_err(|_| Error::Config("Missing ADMIN_API_URL env var".to_string()))?,
            refresh_path: std::env::var("ADMIN_API_REFRESH_PATH")
                .unwrap_or_else(|_| default_refresh_path()),
            refresh_margin_secs: match std::env::var("ADMIN_API_REFRESH_MARGIN_SECS") {
                Ok(raw) => raw.parse().map_err(|_| {
                    Error::Config("ADMIN_API_REFRESH_MARGIN_SECS must be an integer".to_string())
                })?,
                Err(_) => DEFAULT_REFRESH_MARGIN_SECS,
            },
            access_token: std::env::var("ADMIN_API_ACCESS_TOKEN").ok(),
        })
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }

    /// Base URL with an `https://` scheme prepended when none was given.
    pub(crate) fn normalized_base_url(&self) -> String {
        if self.base_url.starts_with("http") {
            self.base_url.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", self.base_url.trim_end_matches('/'))
        }
    }

    pub(crate) fn refresh_url(&self) -> String {
        format!("{}{}", self.normalized_base_url(), self.refresh_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied_when_fields_are_omitted() {
        let config: Config = serde_json::from_str(r#"{"base_url":"https://api.test"}"#).unwrap();
        assert_eq!(config.refresh_path, "/auth/refresh");
        assert_eq!(config.refresh_margin(), Duration::from_secs(10));
        assert!(config.access_token.is_none());
    }

    #[test]
    fn scheme_is_prepended_and_trailing_slash_trimmed() {
        let config = Config::new("api.test/");
        assert_eq!(config.normalized_base_url(), "https://api.test");
        assert_eq!(config.refresh_url(), "https://api.test/auth/refresh");
    }

    #[test]
    fn explicit_scheme_is_preserved() {
        let config = Config::new("http://127.0.0.1:8080");
        assert_eq!(config.refresh_url(), "http://127.0.0.1:8080/auth/refresh");
    }
}
