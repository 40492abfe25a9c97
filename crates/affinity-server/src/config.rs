use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use affinity_api::EngineConfig;
use affinity_api::scheduler::ScheduleConfig;
use affinity_llm::OpenAiConfig;

/// Server configuration, read from `AFFINITY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub llm: OpenAiConfig,
    pub engine: EngineConfig,
    pub schedule: ScheduleConfig,
    pub sweep_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let num = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(v) => v.trim().parse().with_context(|| format!("{} must be a number, got '{}'", key, v)),
                None => Ok(default),
            }
        };

        let timeout = Duration::from_secs(num("AFFINITY_LLM_TIMEOUT_SECS", 60)?);
        let token_budget: usize = num("AFFINITY_CONTEXT_TOKEN_BUDGET", 6000)?
            .try_into()
            .context("AFFINITY_CONTEXT_TOKEN_BUDGET out of range")?;

        let llm_defaults = OpenAiConfig::default();
        let llm = OpenAiConfig {
            base_url: get("AFFINITY_LLM_BASE_URL", &llm_defaults.base_url),
            api_key: get("AFFINITY_LLM_API_KEY", ""),
            model: get("AFFINITY_LLM_MODEL", &llm_defaults.model),
            timeout,
            ..llm_defaults
        };

        let schedule_defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            ttl: Duration::from_secs(num("AFFINITY_SCHEDULE_TTL_SECS", schedule_defaults.ttl.as_secs())?),
            capacity: num("AFFINITY_SCHEDULE_CAPACITY", schedule_defaults.capacity as u64)?
                .try_into()
                .context("AFFINITY_SCHEDULE_CAPACITY out of range")?,
            ..schedule_defaults
        };

        Ok(Self {
            host: get("AFFINITY_HOST", "0.0.0.0"),
            port: num("AFFINITY_PORT", 3000)?
                .try_into()
                .context("AFFINITY_PORT out of range")?,
            db_path: get("AFFINITY_DB_PATH", "affinity.db").into(),
            llm,
            engine: EngineConfig {
                context_turns: num("AFFINITY_CONTEXT_TURNS", 10)?
                    .try_into()
                    .context("AFFINITY_CONTEXT_TURNS out of range")?,
                // 0 disables trimming
                token_budget: (token_budget > 0).then_some(token_budget),
                completion_timeout: timeout,
            },
            schedule,
            sweep_interval_secs: 3600,
        })
    }
}
