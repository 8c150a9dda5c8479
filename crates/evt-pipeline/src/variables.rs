//! Runtime variables and connection-string resolution
//!
//! A setting is looked up in the runtime variable store first and in the
//! process environment second, under the same key.

use evt_common::{EtlError, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Source of named string settings
pub trait VariableSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Variables held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticVariables {
    values: HashMap<String, String>,
}

impl StaticVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Load a flat JSON object of string values.
    ///
    /// Non-string values are stored as their JSON text.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)
            .map_err(|e| {
                EtlError::Configuration(format!(
                    "variables file {} is not a JSON object: {}",
                    path.display(),
                    e
                ))
            })?;

        let values = object
            .into_iter()
            .map(|(key, value)| match value {
                serde_json::Value::String(s) => (key, s),
                other => (key, other.to_string()),
            })
            .collect::<HashMap<_, _>>();

        debug!(path = %path.display(), count = values.len(), "Loaded runtime variables");
        Ok(Self { values })
    }
}

impl VariableSource for StaticVariables {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// The process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl VariableSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Resolves the store connection string with a fixed override order:
/// runtime variable, then environment variable, else a configuration error.
pub struct ConnectionResolver {
    key: String,
    runtime: Box<dyn VariableSource>,
    env: Box<dyn VariableSource>,
}

impl ConnectionResolver {
    pub fn new(
        key: impl Into<String>,
        runtime: impl VariableSource + 'static,
        env: impl VariableSource + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            runtime: Box::new(runtime),
            env: Box::new(env),
        }
    }

    /// Resolver backed by an optional variables file and the process environment
    pub fn from_sources(key: impl Into<String>, variables_file: Option<&Path>) -> Result<Self> {
        let runtime = match variables_file {
            Some(path) => StaticVariables::from_json_file(path)?,
            None => StaticVariables::new(),
        };
        Ok(Self::new(key, runtime, ProcessEnv))
    }

    pub fn resolve(&self) -> Result<String> {
        let not_blank = |value: &String| !value.trim().is_empty();

        if let Some(value) = self.runtime.get(&self.key).filter(not_blank) {
            debug!(key = %self.key, origin = "runtime", "Resolved connection string");
            return Ok(value);
        }

        if let Some(value) = self.env.get(&self.key).filter(not_blank) {
            debug!(key = %self.key, origin = "env", "Resolved connection string");
            return Ok(value);
        }

        Err(EtlError::Configuration(format!(
            "{} not set; set it as a runtime variable or environment variable",
            self.key
        )))
    }
}

impl std::fmt::Debug for ConnectionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionResolver")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "mongodb_conn_string";

    #[test]
    fn test_runtime_variable_wins() {
        let resolver = ConnectionResolver::new(
            KEY,
            StaticVariables::new().with(KEY, "mongodb://runtime"),
            StaticVariables::new().with(KEY, "mongodb://env"),
        );
        assert_eq!(resolver.resolve().unwrap(), "mongodb://runtime");
    }

    #[test]
    fn test_env_used_when_runtime_missing() {
        let resolver = ConnectionResolver::new(
            KEY,
            StaticVariables::new().with(KEY, "   "),
            StaticVariables::new().with(KEY, "mongodb://env"),
        );
        assert_eq!(resolver.resolve().unwrap(), "mongodb://env");
    }

    #[test]
    fn test_missing_everywhere_is_configuration_error() {
        let resolver = ConnectionResolver::new(KEY, StaticVariables::new(), StaticVariables::new());
        let err = resolver.resolve().unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
        assert!(err.to_string().contains(KEY));
    }

    #[test]
    fn test_variables_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variables.json");
        std::fs::write(&path, r#"{"mongodb_conn_string": "mongodb://file", "retries": 2}"#).unwrap();

        let vars = StaticVariables::from_json_file(&path).unwrap();
        assert_eq!(vars.get(KEY).as_deref(), Some("mongodb://file"));
        assert_eq!(vars.get("retries").as_deref(), Some("2"));
        assert_eq!(vars.get("absent"), None);
    }

    #[test]
    fn test_variables_file_must_be_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("variables.json");
        std::fs::write(&path, "[1, 2]").unwrap();

        let err = StaticVariables::from_json_file(&path).unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }

    #[test]
    fn test_process_env_backs_resolver() {
        const ENV_KEY: &str = "EVT_TEST_PROCESS_ENV_CONNECTION";
        std::env::set_var(ENV_KEY, "mongodb://process-env");

        assert_eq!(ProcessEnv.get(ENV_KEY).as_deref(), Some("mongodb://process-env"));
        let resolver = ConnectionResolver::from_sources(ENV_KEY, None).unwrap();
        let resolved = resolver.resolve();
        std::env::remove_var(ENV_KEY);

        assert_eq!(resolved.unwrap(), "mongodb://process-env");
        assert_eq!(ProcessEnv.get(ENV_KEY), None);
    }
}
