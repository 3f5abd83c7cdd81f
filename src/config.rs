use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::gemini::DEMO_KEY;
use crate::retry::RetryPolicy;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_STATE_PATH: &str = "thumbnail_studio_state.json";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_key: String,
    pub api_base: String,
    pub port: u16,
    /// Where `{feed, history}` is persisted.
    pub state_path: PathBuf,
    pub generation_concurrency: usize,
    pub caption_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: DEMO_KEY.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            port: 8080,
            state_path: PathBuf::from(DEFAULT_STATE_PATH),
            generation_concurrency: 3,
            caption_concurrency: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let parse = |key: &str| -> Result<Option<u64>> {
            lookup(key)
                .map(|v| u64::from_str(v.trim()).with_context(|| format!("{key} must be a non-negative integer, got {v:?}")))
                .transpose()
        };

        let port = match lookup("PORT") {
            Some(v) => v.trim().parse().with_context(|| format!("PORT must be a port number, got {v:?}"))?,
            None => defaults.port,
        };

        Ok(Self {
            api_key: lookup("GEMINI_API_KEY").unwrap_or(defaults.api_key),
            api_base: lookup("GEMINI_API_BASE").unwrap_or(defaults.api_base),
            port,
            state_path: lookup("STUDIO_STATE_PATH").map(PathBuf::from).unwrap_or(defaults.state_path),
            generation_concurrency: parse("GENERATION_CONCURRENCY")?
                .map(|v| v as usize)
                .unwrap_or(defaults.generation_concurrency),
            caption_concurrency: parse("CAPTION_CONCURRENCY")?
                .map(|v| v as usize)
                .unwrap_or(defaults.caption_concurrency),
            retry: RetryPolicy {
                max_attempts: parse("RETRY_MAX_ATTEMPTS")?
                    .map(|v| v as u32)
                    .unwrap_or(defaults.retry.max_attempts),
                base_delay: parse("RETRY_BASE_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
                multiplier: parse("RETRY_MULTIPLIER")?
                    .map(|v| v as u32)
                    .unwrap_or(defaults.retry.multiplier),
            },
        })
    }

    pub fn is_demo(&self) -> bool {
        self.api_key == DEMO_KEY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = config(&[]).unwrap();
        assert!(config.is_demo());
        assert_eq!(config.port, 8080);
        assert_eq!(config.generation_concurrency, 3);
        assert_eq!(config.caption_concurrency, 5);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn reads_overrides() {
        let config = config(&[
            ("GEMINI_API_KEY", "secret"),
            ("PORT", "3000"),
            ("STUDIO_STATE_PATH", "/tmp/studio.json"),
            ("GENERATION_CONCURRENCY", "5"),
            ("RETRY_BASE_DELAY_MS", "250"),
        ])
        .unwrap();
        assert!(!config.is_demo());
        assert_eq!(config.port, 3000);
        assert_eq!(config.state_path, PathBuf::from("/tmp/studio.json"));
        assert_eq!(config.generation_concurrency, 5);
        assert_eq!(config.retry.base_delay, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn malformed_numbers_are_errors() {
        let err = config(&[("RETRY_MAX_ATTEMPTS", "three")]).unwrap_err();
        assert!(err.to_string().contains("RETRY_MAX_ATTEMPTS"));
        assert!(config(&[("PORT", "99999")]).is_err());
    }
}
