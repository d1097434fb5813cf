use std::collections::BTreeMap;
use std::env;

/// Read-only lookup of named configuration values (API keys, project ids).
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Process environment; blank values count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialSource for EnvCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        non_empty_env(key)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: BTreeMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl CredentialSource for StaticCredentials {
    fn lookup(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
