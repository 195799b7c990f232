use std::{path::PathBuf, time::Duration};

use crate::{error::ProviderError, retry::RetryPolicy};

pub const DEFAULT_API_URL: &str = "https://generativelanguage.googleapis.com";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
pub const API_URL_ENV: &str = "GEMINI_API_URL";

/// Most capable-per-cost first.
pub const DEFAULT_MODEL_CANDIDATES: &[&str] = &[
    "gemini-2.5-flash",
    "gemini-2.0-flash",
    "gemini-1.5-flash",
    "gemini-1.5-pro",
];

#[derive(Clone, Debug)]
pub struct ProviderConfig {
    pub api_url: String,
    pub api_key: String,
}

impl ProviderConfig {
    /// Read the endpoint and key from the environment
    pub fn from_env() -> Result<Self, ProviderError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| ProviderError::MissingApiKey {
            env_var: API_KEY_ENV.to_string(),
        })?;
        let api_url = std::env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        Ok(Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model_candidates: Vec<String>,
    pub retry: RetryPolicy,
    /// Transcript ceiling applied before every prompt.
    pub transcript_char_limit: usize,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub analysis_deadline: Duration,
    /// Downloaded and uploaded videos live here until their run ends.
    pub work_dir: PathBuf,
    pub popular_min_frequency: u32,
    pub popular_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_candidates: DEFAULT_MODEL_CANDIDATES
                .iter()
                .map(|m| m.to_string())
                .collect(),
            retry: RetryPolicy::default(),
            transcript_char_limit: 10_000,
            poll_interval: Duration::from_secs(5),
            max_polls: 120,
            analysis_deadline: Duration::from_secs(30 * 60),
            work_dir: default_work_dir(),
            popular_min_frequency: 3,
            popular_limit: 10,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `VIDLEARN_*` variables where present.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(models) = std::env::var("VIDLEARN_MODELS") {
            let models = parse_model_list(&models);
            if !models.is_empty() {
                config.model_candidates = models;
            }
        }
        if let Some(limit) = env_number("VIDLEARN_TRANSCRIPT_CHARS") {
            config.transcript_char_limit = limit as usize;
        }
        if let Some(attempts) = env_number("VIDLEARN_RETRY_ATTEMPTS") {
            config.retry.max_attempts = attempts.max(1) as u32;
        }
        if let Some(ms) = env_number("VIDLEARN_RETRY_DELAY_MS") {
            config.retry.initial_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = env_number("VIDLEARN_POLL_INTERVAL_SECS") {
            config.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env_number("VIDLEARN_DEADLINE_SECS") {
            config.analysis_deadline = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("VIDLEARN_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }

        config
    }
}

pub fn default_work_dir() -> PathBuf {
    get_root_cache_dir().join("videos")
}

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vidlearn")
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("vidlearn")
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect()
}

fn env_number(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
