//! Application settings loaded from the environment
//!
//! Call `dotenv::dotenv().ok()` before `Settings::from_env()` to pick up a
//! local `.env` file.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_MAX_ITERATIONS: usize = 10;
pub const DEFAULT_INACTIVITY_MINUTES: i64 = 30;
pub const DEFAULT_PRICE_FETCH_CONCURRENCY: usize = 10;

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub api_port: u16,
    pub log_level: String,
    pub llm: LlmSettings,
    pub portfolio_api_base_url: Option<String>,
    pub prompts_file: Option<PathBuf>,
    pub agent: AgentSettings,
}

#[derive(Debug, Clone, Default)]
pub struct LlmSettings {
    pub endpoint: String,
    pub api_key: String,
    pub deployment: String,
    pub api_version: String,
}

impl LlmSettings {
    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && !self.api_key.is_empty() && !self.deployment.is_empty()
    }
}

/// Tunables for one agent run.
#[derive(Debug, Clone, Copy)]
pub struct AgentSettings {
    pub max_iterations: usize,
    pub inactivity_minutes: i64,
    pub price_fetch_concurrency: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            inactivity_minutes: DEFAULT_INACTIVITY_MINUTES,
            price_fetch_concurrency: DEFAULT_PRICE_FETCH_CONCURRENCY,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .or_else(|_| env::var("POSTGRES_URL"))
            .ok()
            .filter(|url| !url.trim().is_empty());

        let api_port = parse_var("PORT")
            .or_else(|| parse_var("API_PORT"))
            .transpose()?
            .unwrap_or(8000);

        let llm = LlmSettings {
            endpoint: env::var("LLM_ENDPOINT").unwrap_or_default(),
            api_key: env::var("LLM_API_KEY").unwrap_or_default(),
            deployment: env::var("LLM_DEPLOYMENT").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_version: env::var("LLM_API_VERSION")
                .unwrap_or_else(|_| "2024-08-01-preview".to_string()),
        };

        let agent = AgentSettings {
            max_iterations: parse_var("AGENT_MAX_ITERATIONS")
                .transpose()?
                .unwrap_or(DEFAULT_MAX_ITERATIONS),
            inactivity_minutes: parse_var("THREAD_INACTIVITY_MINUTES")
                .transpose()?
                .unwrap_or(DEFAULT_INACTIVITY_MINUTES),
            price_fetch_concurrency: parse_var("PRICE_FETCH_CONCURRENCY")
                .transpose()?
                .unwrap_or(DEFAULT_PRICE_FETCH_CONCURRENCY),
        };

        if agent.max_iterations == 0 {
            return Err(AgentError::Config(
                "AGENT_MAX_ITERATIONS must be at least 1".to_string(),
            ));
        }
        if agent.price_fetch_concurrency == 0 {
            return Err(AgentError::Config(
                "PRICE_FETCH_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            api_port,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            llm,
            portfolio_api_base_url: env::var("PORTFOLIO_API_BASE_URL")
                .or_else(|_| env::var("FINANCIAL_API_BASE_URL"))
                .ok(),
            prompts_file: env::var("AGENT_PROMPTS_FILE").ok().map(PathBuf::from),
            agent,
        })
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<Result<T>> {
    let raw = env::var(name).ok()?;
    Some(raw.trim().parse::<T>().map_err(|_| {
        AgentError::Config(format!("{} has an invalid value: {}", name, raw))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_defaults() {
        let agent = AgentSettings::default();
        assert_eq!(agent.max_iterations, 10);
        assert_eq!(agent.inactivity_minutes, 30);
        assert_eq!(agent.price_fetch_concurrency, 10);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        env::set_var("PCA_TEST_GARBAGE_PORT", "eighty");
        let parsed: Option<Result<u16>> = parse_var("PCA_TEST_GARBAGE_PORT");
        assert!(matches!(parsed, Some(Err(AgentError::Config(_)))));
        env::remove_var("PCA_TEST_GARBAGE_PORT");
    }

    #[test]
    fn test_llm_configured() {
        let mut llm = LlmSettings::default();
        assert!(!llm.is_configured());
        llm.endpoint = "https://example.openai.azure.com".to_string();
        llm.api_key = "key".to_string();
        llm.deployment = "gpt-4o-mini".to_string();
        assert!(llm.is_configured());
    }
}
