//! Queue configuration from `RELAYQ_*` environment variables.

use std::time::Duration;

use relayq_core::REQUEST_TIMEOUT_MS;

use crate::store::DEFAULT_CLAIM_LEASE_SECS;
use crate::transport::reqwest_transport::DEFAULT_RESPONSE_TTL;
use crate::worker_pool::DEFAULT_WORKER_POOL_SIZE;

pub const DEFAULT_COLLECT_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_COLLECT_BATCH_SIZE: usize = 200;
pub const DEFAULT_REAP_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub worker_pool_size: usize,
    pub collect_interval: Duration,
    pub reap_interval: Duration,
    pub request_timeout_ms: u64,
    pub claim_lease: Duration,
    pub collect_batch_size: usize,
    pub reap_batch_size: usize,
    pub response_ttl: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse '{value}' as a number")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            collect_interval: DEFAULT_COLLECT_INTERVAL,
            reap_interval: DEFAULT_REAP_INTERVAL,
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            claim_lease: Duration::from_secs(DEFAULT_CLAIM_LEASE_SECS),
            collect_batch_size: DEFAULT_COLLECT_BATCH_SIZE,
            reap_batch_size: DEFAULT_REAP_BATCH_SIZE,
            response_ttl: DEFAULT_RESPONSE_TTL,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let number = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(raw) => {
                    let value: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                        var,
                        value: raw.clone(),
                    })?;
                    if value == 0 {
                        return Err(ConfigError::Zero(var));
                    }
                    Ok(value)
                }
            }
        };

        Ok(Self {
            worker_pool_size: number(
                "RELAYQ_WORKER_POOL_SIZE",
                defaults.worker_pool_size as u64,
            )? as usize,
            collect_interval: Duration::from_secs(number(
                "RELAYQ_COLLECT_INTERVAL_SECS",
                defaults.collect_interval.as_secs(),
            )?),
            reap_interval: Duration::from_secs(number(
                "RELAYQ_REAP_INTERVAL_SECS",
                defaults.reap_interval.as_secs(),
            )?),
            request_timeout_ms: number("RELAYQ_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
            claim_lease: Duration::from_secs(number(
                "RELAYQ_CLAIM_LEASE_SECS",
                defaults.claim_lease.as_secs(),
            )?),
            collect_batch_size: number(
                "RELAYQ_COLLECT_BATCH_SIZE",
                defaults.collect_batch_size as u64,
            )? as usize,
            reap_batch_size: number("RELAYQ_REAP_BATCH_SIZE", defaults.reap_batch_size as u64)?
                as usize,
            response_ttl: Duration::from_secs(number(
                "RELAYQ_RESPONSE_TTL_SECS",
                defaults.response_ttl.as_secs(),
            )?),
        })
    }
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn unset_variables_take_defaults() {
        let config = QueueConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, QueueConfig::default());
        assert_eq!(config.worker_pool_size, 5);
        assert_eq!(config.collect_interval, Duration::from_secs(20));
        assert_eq!(config.reap_interval, Duration::from_secs(600));
        assert_eq!(config.request_timeout_ms, 6000);
        assert_eq!(config.response_ttl, Duration::from_secs(21600));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = QueueConfig::from_lookup(lookup(&[
            ("RELAYQ_WORKER_POOL_SIZE", "2"),
            ("RELAYQ_COLLECT_INTERVAL_SECS", " 5 "),
            ("RELAYQ_REAP_BATCH_SIZE", "10"),
        ]))
        .unwrap();
        assert_eq!(config.worker_pool_size, 2);
        assert_eq!(config.collect_interval, Duration::from_secs(5));
        assert_eq!(config.reap_batch_size, 10);
        assert_eq!(config.collect_batch_size, DEFAULT_COLLECT_BATCH_SIZE);
    }

    #[test]
    fn garbage_and_zero_are_rejected() {
        let err = QueueConfig::from_lookup(lookup(&[("RELAYQ_REAP_INTERVAL_SECS", "ten")]));
        assert!(matches!(
            err,
            Err(ConfigError::Invalid {
                var: "RELAYQ_REAP_INTERVAL_SECS",
                ..
            })
        ));

        let err = QueueConfig::from_lookup(lookup(&[("RELAYQ_WORKER_POOL_SIZE", "0")]));
        assert_eq!(err, Err(ConfigError::Zero("RELAYQ_WORKER_POOL_SIZE")));
    }
}
