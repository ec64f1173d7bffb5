//! Runtime configuration
//!
//! Values come from the environment, after an optional `.env` file.

use crate::error::AssistantError;
use crate::Result;
use std::env;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://user_transactions.db";
pub const DEFAULT_CURRENCY_API_BASE: &str = "https://v6.exchangerate-api.com/v6";
pub const DEFAULT_LLM_API_BASE: &str = "https://api.together.xyz/v1/";
pub const DEFAULT_LLM_MODEL: &str = "deepseek-ai/DeepSeek-R1-Distill-Llama-70B-free";
pub const DEFAULT_MAX_STEPS: usize = 20;
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub currency_api_key: Option<String>,
    pub currency_api_base: String,
    pub llm_api_key: Option<String>,
    pub llm_api_base: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub max_steps: usize,
    pub allowed_tables: Vec<String>,
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            currency_api_key: None,
            currency_api_base: DEFAULT_CURRENCY_API_BASE.to_string(),
            llm_api_key: None,
            llm_api_base: DEFAULT_LLM_API_BASE.to_string(),
            llm_model: DEFAULT_LLM_MODEL.to_string(),
            llm_temperature: 0.0,
            max_steps: DEFAULT_MAX_STEPS,
            allowed_tables: default_allowed_tables(),
            port: DEFAULT_PORT,
        }
    }
}

fn default_allowed_tables() -> Vec<String> {
    vec!["transactions".to_string(), "currencies".to_string()]
}

impl Config {
    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = Self::default();

        let llm_temperature = match get(&["LLM_TEMPERATURE"]) {
            Some(raw) => parse_value(&raw, "LLM_TEMPERATURE")?,
            None => defaults.llm_temperature,
        };

        let max_steps = match get(&["AGENT_MAX_STEPS"]) {
            Some(raw) => parse_value::<usize>(&raw, "AGENT_MAX_STEPS")?,
            None => defaults.max_steps,
        };
        if max_steps == 0 {
            return Err(AssistantError::Config(
                "AGENT_MAX_STEPS must be at least 1".to_string(),
            ));
        }

        let port = match get(&["PORT", "API_PORT"]) {
            Some(raw) => parse_value(&raw, "PORT")?,
            None => defaults.port,
        };

        let allowed_tables = get(&["ALLOWED_TABLES"])
            .map(|raw| {
                raw.split(',')
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|tables| !tables.is_empty())
            .unwrap_or(defaults.allowed_tables);

        Ok(Self {
            database_url: get(&["DATABASE_URL"]).unwrap_or(defaults.database_url),
            currency_api_key: get(&["CURRENCY_API_KEY", "currency_api_key"]),
            currency_api_base: get(&["CURRENCY_API_BASE"])
                .unwrap_or(defaults.currency_api_base),
            llm_api_key: get(&["TOGETHER_API_KEY", "LLM_API_KEY"]),
            llm_api_base: get(&["LLM_API_BASE"]).unwrap_or(defaults.llm_api_base),
            llm_model: get(&["LLM_MODEL"]).unwrap_or(defaults.llm_model),
            llm_temperature,
            max_steps,
            allowed_tables,
            port,
        })
    }
}

fn parse_value<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| AssistantError::Config(format!("{} has invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.llm_model, DEFAULT_LLM_MODEL);
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.port, 8080);
        assert_eq!(config.allowed_tables, vec!["transactions", "currencies"]);
        assert!(config.currency_api_key.is_none());
        assert!(config.llm_api_key.is_none());
    }

    #[test]
    fn test_aliases_and_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("currency_api_key", "abc123"),
            ("LLM_API_KEY", "llm-key"),
            ("API_PORT", "9090"),
            ("ALLOWED_TABLES", " Transactions , budgets ,"),
            ("AGENT_MAX_STEPS", "7"),
        ]))
        .unwrap();

        assert_eq!(config.currency_api_key.as_deref(), Some("abc123"));
        assert_eq!(config.llm_api_key.as_deref(), Some("llm-key"));
        assert_eq!(config.port, 9090);
        assert_eq!(config.allowed_tables, vec!["transactions", "budgets"]);
        assert_eq!(config.max_steps, 7);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = Config::from_lookup(lookup_from(&[("AGENT_MAX_STEPS", "0")])).unwrap_err();
        assert!(matches!(err, AssistantError::Config(_)));
    }
}
