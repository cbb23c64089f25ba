use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::models::{Endpoint, EndpointSummary, HealthReport};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/** \brief Variables `/health` reports on; one key and one base URL per default endpoint. */
pub const REQUIRED_VARS: [&str; 4] = [
    "MODEL_A_API_KEY",
    "MODEL_B_API_KEY",
    "MODEL_A_BASE_URL",
    "MODEL_B_BASE_URL",
];

/**
 * \brief Process-wide settings, read once from the environment at startup.
 */
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub allowed_origins: Vec<String>,
    /** \brief Used by `/chat` when a request carries no endpoints. */
    pub default_endpoints: Vec<Endpoint>,
    pub missing_env_vars: Vec<String>,
    pub code_execution: bool,
    pub python: String,
    pub telemetry: bool,
    /** \brief Relay strategy instead of parallel fan-out. */
    pub relay: bool,
    /** \brief Where `multichat.log` goes; `./logs` when unset. */
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /**
     * \brief Build settings from any key lookup; empty values count as unset.
     */
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| ConfigError::InvalidVar {
                var: "PORT",
                value: raw.clone(),
            })?,
            None => DEFAULT_PORT,
        };
        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| DEFAULT_ALLOWED_ORIGIN.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let default_endpoints = vec![
            Endpoint {
                name: "Model A".to_string(),
                api_key: get("MODEL_A_API_KEY").unwrap_or_default(),
                base_url: get("MODEL_A_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model_id: "gpt-3.5-turbo".to_string(),
            },
            Endpoint {
                name: "Model B".to_string(),
                api_key: get("MODEL_B_API_KEY").unwrap_or_default(),
                base_url: get("MODEL_B_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                model_id: "gpt-4".to_string(),
            },
        ];
        let missing_env_vars = REQUIRED_VARS
            .iter()
            .filter(|var| get(var).is_none())
            .map(|var| var.to_string())
            .collect();

        Ok(Self {
            port,
            allowed_origins,
            default_endpoints,
            missing_env_vars,
            code_execution: parse_flag("MULTICHAT_CODE_EXECUTION", get("MULTICHAT_CODE_EXECUTION"))?,
            python: get("MULTICHAT_PYTHON").unwrap_or_else(|| "python3".to_string()),
            telemetry: parse_flag("MULTICHAT_TELEMETRY", get("MULTICHAT_TELEMETRY"))?,
            relay: parse_flag("MULTICHAT_RELAY", get("MULTICHAT_RELAY"))?,
            log_dir: get("MULTICHAT_LOG_DIR").map(PathBuf::from),
        })
    }
}

/**
 * \brief Health summary for `/health`: "warning" while any default-endpoint variable is unset.
 */
pub fn health_report(settings: &Settings) -> HealthReport {
    HealthReport {
        status: if settings.missing_env_vars.is_empty() {
            "healthy".to_string()
        } else {
            "warning".to_string()
        },
        missing_env_vars: settings.missing_env_vars.clone(),
        default_endpoints: settings
            .default_endpoints
            .iter()
            .map(|e| EndpointSummary {
                name: e.name.clone(),
                model: e.model_id.clone(),
            })
            .collect(),
    }
}

fn parse_flag(var: &'static str, value: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidVar { var, value: raw }),
    }
}

#[derive(Debug, Deserialize)]
struct EndpointFile {
    #[serde(default)]
    endpoints: Vec<EndpointEntry>,
}

#[derive(Debug, Deserialize)]
struct EndpointEntry {
    name: String,
    #[serde(default)]
    api_key: Option<String>,
    /** \brief Name of an environment variable holding the key. */
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    model_id: String,
}

/**
 * \brief Parse `[[endpoints]]` tables from TOML text.
 * \details Keys may be inline (`api_key`) or indirect (`api_key_env`); the inline value wins.
 */
pub fn parse_endpoints<F>(text: &str, lookup: F) -> Result<Vec<Endpoint>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let file: EndpointFile = toml::from_str(text)?;
    Ok(file
        .endpoints
        .into_iter()
        .map(|e| Endpoint {
            api_key: e
                .api_key
                .or_else(|| e.api_key_env.as_deref().and_then(&lookup))
                .unwrap_or_default(),
            base_url: e.base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            name: e.name,
            model_id: e.model_id,
        })
        .collect())
}

pub fn load_endpoints(path: &Path) -> Result<Vec<Endpoint>, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_endpoints(&text, |key| std::env::var(key).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let s = Settings::from_lookup(lookup(&[])).expect("settings");
        assert_eq!(s.port, DEFAULT_PORT);
        assert_eq!(s.allowed_origins, vec![DEFAULT_ALLOWED_ORIGIN.to_string()]);
        assert_eq!(s.default_endpoints.len(), 2);
        assert!(s.default_endpoints.iter().all(|e| !e.is_active()));
        assert_eq!(s.default_endpoints[1].model_id, "gpt-4");
        assert_eq!(s.missing_env_vars.len(), 4);
        assert!(!s.code_execution);
        assert!(!s.relay);
        assert!(s.log_dir.is_none());
    }

    #[test]
    fn test_reads_env_values() {
        let s = Settings::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test,"),
            ("MODEL_A_API_KEY", "sk-a"),
            ("MODEL_A_BASE_URL", "https://openrouter.ai/api/v1"),
            ("MULTICHAT_CODE_EXECUTION", "yes"),
            ("MULTICHAT_RELAY", "1"),
            ("MULTICHAT_LOG_DIR", "/var/log/multichat"),
        ]))
        .expect("settings");
        assert_eq!(s.port, 9000);
        assert_eq!(s.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert!(s.default_endpoints[0].is_active());
        assert_eq!(s.default_endpoints[0].base_url, "https://openrouter.ai/api/v1");
        assert_eq!(s.missing_env_vars, vec!["MODEL_B_API_KEY", "MODEL_B_BASE_URL"]);
        assert!(s.code_execution);
        assert!(s.relay);
        assert_eq!(s.log_dir, Some(PathBuf::from("/var/log/multichat")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Settings::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("MULTICHAT_RELAY", "maybe")])).is_err());
    }

    #[test]
    fn test_parse_endpoints_file() {
        let text = r#"
            [[endpoints]]
            name = "GPT"
            api_key = "sk-inline"
            model_id = "gpt-4o"

            [[endpoints]]
            name = "Claude via OpenRouter"
            api_key_env = "OPENROUTER_API_KEY"
            base_url = "https://openrouter.ai/api/v1"
            model_id = "anthropic/claude-3.5-sonnet"

            [[endpoints]]
            name = "Local"
            base_url = "http://localhost:11434/v1"
            model_id = "llama3"
        "#;
        let eps = parse_endpoints(text, lookup(&[("OPENROUTER_API_KEY", "sk-or")])).expect("parse");
        assert_eq!(eps.len(), 3);
        assert_eq!(eps[0].base_url, DEFAULT_BASE_URL);
        assert_eq!(eps[0].api_key, "sk-inline");
        assert_eq!(eps[1].api_key, "sk-or");
        assert!(!eps[2].is_active());
    }
}
