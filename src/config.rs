//! Trace session configuration.
//!
//! Create using `TraceConfig::builder()`.

use crate::env_policy::DEFAULT_TRACE_SEARCH_PATH;
use crate::error::TraceError;
use std::path::{Path, PathBuf};

/// Default tracer binary.
pub const DEFAULT_TRACER: &str = "/usr/bin/strace";

/// Default filter binary used for the focus log.
pub const DEFAULT_GREP: &str = "/usr/bin/grep";

/// Default cap on captured string arguments.
pub const DEFAULT_STRING_LIMIT: usize = 128;

/// Log roots tried in order, relative to the working directory.
pub const DEFAULT_LOG_ROOTS: &[&str] = &["./logs/pipetrace", "./tmp/pipetrace"];

/// Settings for a trace session.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    /// Absolute path of the syscall tracer.
    tracer: PathBuf,

    /// Absolute path of grep, used by the focus filter.
    grep: PathBuf,

    /// Candidate log roots, primary first.
    log_roots: Vec<PathBuf>,

    /// `PATH` given to the traced invocation.
    search_path: String,

    /// Maximum length of captured strings.
    string_limit: usize,
}

impl TraceConfig {
    pub fn builder() -> TraceConfigBuilder {
        TraceConfigBuilder::new()
    }

    pub fn tracer(&self) -> &Path {
        &self.tracer
    }

    pub fn grep(&self) -> &Path {
        &self.grep
    }

    pub fn log_roots(&self) -> &[PathBuf] {
        &self.log_roots
    }

    pub fn search_path(&self) -> &str {
        &self.search_path
    }

    pub fn string_limit(&self) -> usize {
        self.string_limit
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            tracer: PathBuf::from(DEFAULT_TRACER),
            grep: PathBuf::from(DEFAULT_GREP),
            log_roots: DEFAULT_LOG_ROOTS.iter().map(PathBuf::from).collect(),
            search_path: DEFAULT_TRACE_SEARCH_PATH.to_string(),
            string_limit: DEFAULT_STRING_LIMIT,
        }
    }
}

/// Builder for `TraceConfig`.
#[derive(Debug, Clone, Default)]
pub struct TraceConfigBuilder {
    config: TraceConfig,
}

impl TraceConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tracer binary. Must be absolute.
    pub fn tracer(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tracer = path.into();
        self
    }

    /// Set the grep binary. Must be absolute.
    pub fn grep(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.grep = path.into();
        self
    }

    /// Replace the candidate log roots. The first writable one wins.
    pub fn log_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.config.log_roots = roots.into_iter().map(Into::into).collect();
        self
    }

    /// Set the `PATH` of the traced invocation.
    pub fn search_path(mut self, path: impl Into<String>) -> Self {
        self.config.search_path = path.into();
        self
    }

    /// Set the maximum length of captured strings.
    pub fn string_limit(mut self, limit: usize) -> Self {
        self.config.string_limit = limit;
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// `TraceError::InvalidConfig` if a binary path is relative, no log root
    /// is given, or the search path is empty.
    pub fn build(self) -> Result<TraceConfig, TraceError> {
        let config = self.config;

        for (name, path) in [("tracer", &config.tracer), ("grep", &config.grep)] {
            if !path.is_absolute() {
                return Err(TraceError::InvalidConfig {
                    reason: format!("{} path must be absolute: {}", name, path.display()),
                });
            }
        }
        if config.log_roots.is_empty() {
            return Err(TraceError::InvalidConfig {
                reason: "at least one log root is required".to_string(),
            });
        }
        if config.search_path.is_empty() {
            return Err(TraceError::InvalidConfig {
                reason: "search path is empty".to_string(),
            });
        }

        Ok(config)
    }
}
