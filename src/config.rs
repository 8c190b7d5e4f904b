//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - typesynth.toml (default configuration)
//! - typesynth.local.toml (git-ignored local overrides)
//! - Environment variables (TYPESYNTH_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # typesynth.toml
//! [endpoint]
//! sparql = "https://example.org/sparql"
//!
//! [endpoint.prefixes]
//! ex = "http://example.org/ns#"
//!
//! [rest.headers]
//! Authorization = "Bearer ..."
//!
//! [constants]
//! emission_factor = 2.5
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! TYPESYNTH_ENDPOINT__SPARQL=https://other.org/sparql
//! TYPESYNTH_LOGGING__LEVEL=debug
//! ```

use crate::executor::ExecutionContext;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub rest: RestConfig,
    /// Named constants merged over the built-in defaults
    #[serde(default)]
    pub constants: HashMap<String, f64>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote-query endpoint configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Query endpoint URL; the deterministic mock is used when absent
    #[serde(default)]
    pub sparql: Option<String>,

    /// Namespace prefix declarations prepended to queries
    #[serde(default)]
    pub prefixes: HashMap<String, String>,
}

/// REST backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestConfig {
    /// Headers sent with every REST call
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. typesynth.toml (base configuration)
    /// 2. typesynth.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (TYPESYNTH_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("typesynth.toml"))
            .merge(Toml::file("typesynth.local.toml"))
            .merge(Env::prefixed("TYPESYNTH_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TYPESYNTH_").split("__"))
            .extract()
    }

    /// Build an execution context from this configuration. Configured
    /// constants are merged over the built-in defaults.
    pub fn into_context(self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        context.sparql_endpoint = self.endpoint.sparql;
        context.sparql_prefixes = self.endpoint.prefixes;
        context.rest_headers = self.rest.headers;
        for (name, value) in self.constants {
            context.constants.insert(name, value);
        }
        context
    }
}
