//! Environment handed to spawned stages.
//!
//! Command pipelines inherit the caller's environment. Traced invocations get
//! a minimal fixed environment so only expected system binaries resolve while
//! the tracer is capturing.

use std::collections::HashMap;

/// Search path given to traced invocations.
pub const DEFAULT_TRACE_SEARCH_PATH: &str = "/usr/bin:/bin";

/// Variables stripped from every fixed environment.
///
/// These can inject code into the loader or an interpreter and would make a
/// captured trace describe something other than the pipeline under study.
pub const ALWAYS_STRIP: &[&str] = &[
    "LD_PRELOAD",
    "LD_LIBRARY_PATH",
    "LD_AUDIT",
    "LD_DEBUG",
    "LD_PROFILE",
    "DYLD_INSERT_LIBRARIES",
    "DYLD_LIBRARY_PATH",
    "DYLD_FRAMEWORK_PATH",
    "DYLD_FALLBACK_LIBRARY_PATH",
    "BASH_ENV",
    "ENV",
    "SHELLOPTS",
    "BASHOPTS",
    "IFS",
    "CDPATH",
];

/// Policy for the environment of spawned stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvPolicy {
    /// Inherit the orchestrator's environment unchanged (default).
    #[default]
    Inherit,

    /// Clear the environment and pass exactly these variables.
    ///
    /// `ALWAYS_STRIP` is still applied.
    Fixed(HashMap<String, String>),
}

impl EnvPolicy {
    /// A fixed environment holding only `PATH`.
    pub fn search_path_only(path: impl Into<String>) -> Self {
        EnvPolicy::Fixed(HashMap::from([("PATH".to_string(), path.into())]))
    }

    /// The variables to install after clearing, or `None` to inherit.
    pub fn resolve(&self) -> Option<HashMap<String, String>> {
        match self {
            EnvPolicy::Inherit => None,
            EnvPolicy::Fixed(fixed) => {
                let mut env = fixed.clone();
                strip_dangerous(&mut env);
                Some(env)
            }
        }
    }

    /// Check if a specific key would be removed by `ALWAYS_STRIP`.
    pub fn is_forbidden(key: &str) -> bool {
        ALWAYS_STRIP.iter().any(|&s| s.eq_ignore_ascii_case(key))
    }
}

fn strip_dangerous(env: &mut HashMap<String, String>) {
    env.retain(|key, _| !EnvPolicy::is_forbidden(key));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inherit_resolves_to_none() {
        assert_eq!(EnvPolicy::Inherit.resolve(), None);
    }

    #[test]
    fn test_search_path_only() {
        let env = EnvPolicy::search_path_only(DEFAULT_TRACE_SEARCH_PATH)
            .resolve()
            .unwrap();
        assert_eq!(env.len(), 1);
        assert_eq!(env.get("PATH"), Some(&"/usr/bin:/bin".to_string()));
    }

    #[test]
    fn test_fixed_strips_loader_injection() {
        let policy = EnvPolicy::Fixed(HashMap::from([
            ("PATH".to_string(), "/bin".to_string()),
            ("LD_PRELOAD".to_string(), "/evil.so".to_string()),
            ("ld_library_path".to_string(), "/evil".to_string()),
        ]));

        let env = policy.resolve().unwrap();
        assert!(env.contains_key("PATH"));
        assert!(!env.contains_key("LD_PRELOAD"));
        assert!(!env.contains_key("ld_library_path"));
    }

    #[test]
    fn test_is_forbidden() {
        assert!(EnvPolicy::is_forbidden("LD_PRELOAD"));
        assert!(EnvPolicy::is_forbidden("BASH_ENV"));
        assert!(!EnvPolicy::is_forbidden("PATH"));
        assert!(!EnvPolicy::is_forbidden("HOME"));
    }
}
