//! sqlq configuration.
//!
//! Settings come from a TOML file (by default
//! `<config dir>/sqlq/config.toml`) or are assembled with [`ConfigBuilder`].
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! sql_directory = "sql"
//! enable_cache = true
//!
//! [log]
//! queries = true
//! results = false
//! regex = "^get-"
//! ```

use crate::error::{SqlqError, SqlqResult};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Pool size for the PostgreSQL driver
    pub max_connections: u32,

    /// Directory holding `<name>.sql` templates
    pub sql_directory: PathBuf,

    /// Enable the result cache
    pub enable_cache: bool,

    /// Bound on cached entries; unbounded when absent
    pub max_entries: Option<usize>,

    /// Fail rendering when a `$name` placeholder is left unresolved
    pub strict_substitution: bool,

    /// Diagnostic verbosity
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/postgres".to_string(),
            max_connections: 10,
            sql_directory: PathBuf::from("sql"),
            enable_cache: false,
            max_entries: None,
            strict_substitution: false,
            log: LogConfig::default(),
        }
    }
}

/// Controls which diagnostics are emitted around query execution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log rendered SQL, binds, row counts and timings
    pub queries: bool,
    /// Log result payloads
    pub results: bool,
    /// Only log queries whose name matches this pattern
    pub regex: Option<String>,
    #[serde(skip)]
    compiled: Option<Regex>,
}

impl LogConfig {
    /// Compile the name filter. Called once at initialisation.
    pub fn compile(&mut self) -> SqlqResult<()> {
        self.compiled = match &self.regex {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                SqlqError::Config(format!("invalid log regex '{}': {}", pattern, e))
            })?),
            None => None,
        };
        Ok(())
    }

    /// Whether `name` passes the filter. No filter matches everything.
    pub fn matches(&self, name: &str) -> bool {
        self.compiled
            .as_ref()
            .map(|re| re.is_match(name))
            .unwrap_or(true)
    }
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default location of the configuration file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("sqlq").join("config.toml"))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(text: &str) -> SqlqResult<Self> {
        toml::from_str(text).map_err(|e| SqlqError::Config(e.to_string()))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing default file yields the default configuration; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> SqlqResult<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => {
                tracing::debug!(path = %path.display(), "configuration loaded");
                Self::from_toml(&text)
            }
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SqlqError::Config(format!(
                "cannot read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Check settings and compile derived state.
    pub fn validate(&mut self) -> SqlqResult<()> {
        if self.max_connections == 0 {
            return Err(SqlqError::Config("max_connections must be at least 1".into()));
        }
        if self.max_entries == Some(0) {
            return Err(SqlqError::Config("max_entries must be at least 1".into()));
        }
        self.log.compile()
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database URL
    pub fn database(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Set the template directory
    pub fn sql_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.sql_directory = path.into();
        self
    }

    pub fn enable_cache(mut self, enabled: bool) -> Self {
        self.config.enable_cache = enabled;
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.config.max_entries = Some(max);
        self
    }

    pub fn strict_substitution(mut self, strict: bool) -> Self {
        self.config.strict_substitution = strict;
        self
    }

    pub fn log_queries(mut self, enabled: bool) -> Self {
        self.config.log.queries = enabled;
        self
    }

    pub fn log_results(mut self, enabled: bool) -> Self {
        self.config.log.results = enabled;
        self
    }

    /// Restrict query logging to names matching `pattern`
    pub fn log_filter(mut self, pattern: impl Into<String>) -> Self {
        self.config.log.regex = Some(pattern.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}
