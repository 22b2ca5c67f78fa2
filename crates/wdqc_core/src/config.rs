use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wdqc/0.1";
pub const DEFAULT_API_URL: &str = "https://www.wikidata.org/w/api.php";
pub const DEFAULT_LIFTWING_URL: &str = "https://api.wikimedia.org/service/lw/inference";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: usize = 0;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_RATE_LIMIT_MS: u64 = 100;
pub const DEFAULT_MAX_RANDOM_ID: u64 = 100_000_000;
pub const DEFAULT_ERROR_LOG: &str = "error.log";
pub const DEFAULT_CONFIG_FILENAME: &str = "wdqc.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ToolConfig {
    #[serde(default)]
    pub wikidata: WikidataSection,
    #[serde(default)]
    pub scoring: ScoringSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub run: RunSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikidataSection {
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScoringSection {
    pub liftwing_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct HttpSection {
    /// Sent on every Wikidata and LiftWing request.
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RunSection {
    pub max_random_id: Option<u64>,
    pub error_log: Option<String>,
}

/// Fully resolved settings: environment > config file > built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub api_url: String,
    pub liftwing_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub rate_limit_ms: u64,
    pub max_random_id: u64,
    pub error_log: PathBuf,
}

impl ToolConfig {
    pub fn resolved(&self) -> ResolvedConfig {
        self.resolved_with_lookup(|key| env::var(key).ok())
    }

    fn resolved_with_lookup<F>(&self, lookup: F) -> ResolvedConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        ResolvedConfig {
            api_url: lookup_text(
                &lookup,
                "WDQC_API_URL",
                self.wikidata.api_url.as_deref(),
                DEFAULT_API_URL,
            ),
            liftwing_url: lookup_text(
                &lookup,
                "WDQC_LIFTWING_URL",
                self.scoring.liftwing_url.as_deref(),
                DEFAULT_LIFTWING_URL,
            ),
            user_agent: lookup_text(
                &lookup,
                "WDQC_USER_AGENT",
                self.http.user_agent.as_deref(),
                DEFAULT_USER_AGENT,
            ),
            timeout_ms: lookup_u64(
                &lookup,
                "WDQC_HTTP_TIMEOUT_MS",
                self.http.timeout_ms,
                DEFAULT_TIMEOUT_MS,
            ),
            retries: lookup_usize(
                &lookup,
                "WDQC_HTTP_RETRIES",
                self.http.retries,
                DEFAULT_RETRIES,
            ),
            retry_delay_ms: lookup_u64(
                &lookup,
                "WDQC_HTTP_RETRY_DELAY_MS",
                self.http.retry_delay_ms,
                DEFAULT_RETRY_DELAY_MS,
            ),
            rate_limit_ms: lookup_u64(
                &lookup,
                "WDQC_RATE_LIMIT_MS",
                self.http.rate_limit_ms,
                DEFAULT_RATE_LIMIT_MS,
            ),
            max_random_id: lookup_u64(
                &lookup,
                "WDQC_MAX_RANDOM_ID",
                self.run.max_random_id,
                DEFAULT_MAX_RANDOM_ID,
            ),
            error_log: PathBuf::from(lookup_text(
                &lookup,
                "WDQC_ERROR_LOG",
                self.run.error_log.as_deref(),
                DEFAULT_ERROR_LOG,
            )),
        }
    }
}

/// Load and parse a ToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<ToolConfig> {
    if !config_path.exists() {
        return Ok(ToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn lookup_text<F>(lookup: &F, key: &str, configured: Option<&str>, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    match configured.map(str::trim) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

fn lookup_u64<F>(lookup: &F, key: &str, configured: Option<u64>, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key)
        && let Ok(parsed) = value.trim().parse::<u64>()
    {
        return parsed;
    }
    configured.unwrap_or(default)
}

fn lookup_usize<F>(lookup: &F, key: &str, configured: Option<usize>, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key)
        && let Ok(parsed) = value.trim().parse::<usize>()
    {
        return parsed;
    }
    configured.unwrap_or(default)
}
