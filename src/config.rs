//! Environment-driven configuration.
//!
//! `.env` files are honored via `dotenvy`; every knob has a `FRAUDGRAPH_`
//! prefixed variable. Unknown selector values are configuration errors, not
//! panics.

use miette::Diagnostic;
use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key} (expected one of {expected})")]
    #[diagnostic(
        code(fraudgraph::config::invalid_value),
        help("Fix the {key} environment variable.")
    )]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("invalid integer `{value}` for {key}")]
    #[diagnostic(code(fraudgraph::config::invalid_int))]
    InvalidInt { key: &'static str, value: String },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageBackend {
    #[default]
    Local,
    Table,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmbeddingsProvider {
    #[default]
    Mock,
    Http,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReasoningProvider {
    #[default]
    None,
    Http,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchProviderKind {
    #[default]
    Mock,
    Http,
}

/// All engine knobs, resolved once at startup.
#[derive(Clone, Debug)]
pub struct Settings {
    pub storage_backend: StorageBackend,
    pub embeddings_provider: EmbeddingsProvider,
    pub reasoning_provider: ReasoningProvider,
    pub search_provider: SearchProviderKind,
    pub max_search_results: usize,
    pub allowlist_domains: BTreeSet<String>,
    pub input_dir: PathBuf,
    pub state_dir: PathBuf,
    pub vector_db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::Local,
            embeddings_provider: EmbeddingsProvider::Mock,
            reasoning_provider: ReasoningProvider::None,
            search_provider: SearchProviderKind::Mock,
            max_search_results: 3,
            allowlist_domains: ["example.com", "owasp.org", "mitre.org"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            input_dir: PathBuf::from(".storage/input"),
            state_dir: PathBuf::from(".storage/state"),
            vector_db_path: PathBuf::from(".storage/vectors/policies.db"),
        }
    }
}

fn env_var(key: &'static str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Settings {
    /// Load settings from the environment, reading `.env` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let mut settings = Self::default();

        if let Some(value) = env_var("FRAUDGRAPH_STORAGE_BACKEND") {
            settings.storage_backend = match value.as_str() {
                "local" => StorageBackend::Local,
                "table" | "remote_table" => StorageBackend::Table,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "FRAUDGRAPH_STORAGE_BACKEND",
                        value,
                        expected: "local|table",
                    });
                }
            };
        }
        if let Some(value) = env_var("FRAUDGRAPH_EMBEDDINGS_PROVIDER") {
            settings.embeddings_provider = match value.as_str() {
                "mock" => EmbeddingsProvider::Mock,
                "http" => EmbeddingsProvider::Http,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "FRAUDGRAPH_EMBEDDINGS_PROVIDER",
                        value,
                        expected: "mock|http",
                    });
                }
            };
        }
        if let Some(value) = env_var("FRAUDGRAPH_REASONING_PROVIDER") {
            settings.reasoning_provider = match value.as_str() {
                "none" => ReasoningProvider::None,
                "http" => ReasoningProvider::Http,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "FRAUDGRAPH_REASONING_PROVIDER",
                        value,
                        expected: "none|http",
                    });
                }
            };
        }
        if let Some(value) = env_var("FRAUDGRAPH_SEARCH_PROVIDER") {
            settings.search_provider = match value.as_str() {
                "mock" => SearchProviderKind::Mock,
                "http" => SearchProviderKind::Http,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "FRAUDGRAPH_SEARCH_PROVIDER",
                        value,
                        expected: "mock|http",
                    });
                }
            };
        }
        if let Some(value) = env_var("FRAUDGRAPH_MAX_SEARCH_RESULTS") {
            settings.max_search_results =
                value.parse().map_err(|_| ConfigError::InvalidInt {
                    key: "FRAUDGRAPH_MAX_SEARCH_RESULTS",
                    value,
                })?;
        }
        if let Some(value) = env_var("FRAUDGRAPH_ALLOWLIST_DOMAINS") {
            settings.allowlist_domains = value
                .split(',')
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty())
                .collect();
        }
        if let Some(value) = env_var("FRAUDGRAPH_INPUT_DIR") {
            settings.input_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var("FRAUDGRAPH_STATE_DIR") {
            settings.state_dir = PathBuf::from(value);
        }
        if let Some(value) = env_var("FRAUDGRAPH_VECTOR_DB_PATH") {
            settings.vector_db_path = PathBuf::from(value);
        }

        Ok(settings)
    }
}
