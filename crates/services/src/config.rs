//! Environment-driven configuration.
//!
//! | variable | default |
//! |---|---|
//! | `QUIZ_DB_URL` | `sqlite://quiz.sqlite3` |
//! | `QUIZ_LANGUAGE` | `en` |
//! | `QUIZ_AI_API_KEY` | unset (generation disabled) |
//! | `QUIZ_AI_BASE_URL` | `https://api.openai.com/v1` |
//! | `QUIZ_AI_MODEL` | `gpt-4o-mini` |
//! | `QUIZ_AI_TIMEOUT_SECS` | `30` |

use std::env;
use std::time::Duration;

use quiz_core::model::Language;

use crate::error::ConfigError;

const DEFAULT_DB_URL: &str = "sqlite://quiz.sqlite3";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for the HTTP question provider.
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Upper bound on one request, from connect to the last body byte.
    pub timeout: Duration,
}

impl GeneratorConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Returns `None` without an API key.
    #[must_use]
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let api_key = lookup("QUIZ_AI_API_KEY")?;
        if api_key.trim().is_empty() {
            return None;
        }
        let base_url = lookup("QUIZ_AI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());
        let model = lookup("QUIZ_AI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into());
        let timeout = lookup("QUIZ_AI_TIMEOUT_SECS")
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        Some(Self {
            base_url,
            api_key,
            model,
            timeout,
        })
    }
}

#[derive(Clone, Debug)]
pub struct QuizConfig {
    pub db_url: String,
    pub language: Language,
    pub generator: Option<GeneratorConfig>,
}

impl QuizConfig {
    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the database URL is blank or the language is unknown.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_url = match lookup("QUIZ_DB_URL") {
            Some(raw) if raw.trim().is_empty() => {
                return Err(ConfigError::InvalidValue {
                    var: "QUIZ_DB_URL",
                    raw,
                });
            }
            Some(raw) => normalize_sqlite_url(raw),
            None => DEFAULT_DB_URL.to_string(),
        };
        let language = match lookup("QUIZ_LANGUAGE") {
            Some(raw) => raw.parse::<Language>()?,
            None => Language::default(),
        };
        Ok(Self {
            db_url,
            language,
            generator: GeneratorConfig::from_vars(lookup),
        })
    }
}

/// Accepts bare file paths as well as `sqlite:` URLs.
pub fn normalize_sqlite_url(raw: String) -> String {
    if raw.starts_with("sqlite:") {
        raw
    } else {
        format!("sqlite://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_without_variables() {
        let config = QuizConfig::from_vars(lookup(&[])).unwrap();
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.language, Language::English);
        assert!(config.generator.is_none());
    }

    #[test]
    fn reads_language_and_generator() {
        let config = QuizConfig::from_vars(lookup(&[
            ("QUIZ_LANGUAGE", "hi"),
            ("QUIZ_DB_URL", "data/quiz.db"),
            ("QUIZ_AI_API_KEY", "sk-test"),
            ("QUIZ_AI_MODEL", "small"),
        ]))
        .unwrap();
        assert_eq!(config.language, Language::Hindi);
        assert_eq!(config.db_url, "sqlite://data/quiz.db");
        let generator = config.generator.unwrap();
        assert_eq!(generator.model, "small");
        assert_eq!(generator.base_url, DEFAULT_BASE_URL);
        assert_eq!(generator.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn request_timeout_is_configurable() {
        let config = |raw: &str| {
            GeneratorConfig::from_vars(lookup(&[
                ("QUIZ_AI_API_KEY", "sk-test"),
                ("QUIZ_AI_TIMEOUT_SECS", raw),
            ]))
            .unwrap()
        };
        assert_eq!(config("5").timeout, Duration::from_secs(5));
        assert_eq!(config("0").timeout, DEFAULT_TIMEOUT);
        assert_eq!(config("soon").timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn blank_api_key_disables_generator() {
        assert!(GeneratorConfig::from_vars(lookup(&[("QUIZ_AI_API_KEY", "  ")])).is_none());
    }

    #[test]
    fn rejects_unknown_language() {
        let err = QuizConfig::from_vars(lookup(&[("QUIZ_LANGUAGE", "fr")])).unwrap_err();
        assert!(matches!(err, ConfigError::Language(_)));
    }
}
