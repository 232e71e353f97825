//! Named secret lookup for the Dispatcher.
//!
//! Two names are consulted per dispatch: the API key sent as a bearer
//! token and the base URL that job paths are appended to. A missing or
//! empty value is a hard failure of that dispatch.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

/// Bearer API key.
pub const SERVICE_ROLE_SECRET: &str = "service_role";
/// Base URL of the consuming function.
pub const CONSUMER_FUNCTION_SECRET: &str = "consumer_function";

/// Environment variable prefix used by [`EnvSecretStore`].
pub const ENV_PREFIX: &str = "RELAYQ_SECRET_";

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn secret(&self, name: &str) -> Result<String, SecretError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretError {
    #[error("secret '{0}' is not configured")]
    Missing(String),
}

/// Reads `RELAYQ_SECRET_<NAME>` (upper-cased) at lookup time.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }

    pub fn variable_for(name: &str) -> String {
        format!("{ENV_PREFIX}{}", name.to_ascii_uppercase())
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn secret(&self, name: &str) -> Result<String, SecretError> {
        match std::env::var(Self::variable_for(name)) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(SecretError::Missing(name.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySecretStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with both dispatch secrets set.
    pub fn with_dispatch_secrets(api_key: &str, base_url: &str) -> Self {
        let store = Self::new();
        store.set(SERVICE_ROLE_SECRET, api_key);
        store.set(CONSUMER_FUNCTION_SECRET, base_url);
        store
    }

    pub fn set(&self, name: &str, value: &str) {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&self, name: &str) {
        let mut values = self
            .values
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.remove(name);
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn secret(&self, name: &str) -> Result<String, SecretError> {
        let values = self
            .values
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values
            .get(name)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .ok_or_else(|| SecretError::Missing(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_lookup_and_missing() {
        let store = InMemorySecretStore::with_dispatch_secrets("key", "http://localhost");
        assert_eq!(store.secret(SERVICE_ROLE_SECRET).await.unwrap(), "key");

        store.remove(SERVICE_ROLE_SECRET);
        assert_eq!(
            store.secret(SERVICE_ROLE_SECRET).await,
            Err(SecretError::Missing(SERVICE_ROLE_SECRET.to_string()))
        );

        store.set(CONSUMER_FUNCTION_SECRET, "  ");
        assert!(store.secret(CONSUMER_FUNCTION_SECRET).await.is_err());
    }

    #[test]
    fn env_variable_names_are_upper_cased() {
        assert_eq!(
            EnvSecretStore::variable_for(CONSUMER_FUNCTION_SECRET),
            "RELAYQ_SECRET_CONSUMER_FUNCTION"
        );
    }

    #[tokio::test]
    async fn env_store_reports_unset_variables_as_missing() {
        let store = EnvSecretStore::new();
        let err = store.secret("relayq_test_never_set").await.unwrap_err();
        assert_eq!(err, SecretError::Missing("relayq_test_never_set".to_string()));
    }
}
