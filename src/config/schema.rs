use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TracerConfig {
    #[serde(alias = "transaction_tracer", default)]
    pub transaction_tracer: TransactionTracerConfig,
    #[serde(alias = "slow_sql", default)]
    pub slow_sql: SlowSqlConfig,
    #[serde(default)]
    pub datastore: DatastoreConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub transaction: TransactionConfig,
}

/// How query text is attached to datastore segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecordSql {
    Raw,
    #[default]
    Obfuscated,
    Off,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTracerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(alias = "record_sql", default)]
    pub record_sql: RecordSql,
    /// Queries faster than this are not sampled.
    #[serde(alias = "explain_threshold_ms", default)]
    pub explain_threshold_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlowSqlConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(alias = "max_samples", default = "default_max_samples")]
    pub max_samples: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatastoreConfig {
    #[serde(alias = "instance_reporting", default = "default_enabled")]
    pub instance_reporting: bool,
    #[serde(alias = "database_name_reporting", default = "default_enabled")]
    pub database_name_reporting: bool,
    /// Reported in place of localhost addresses.
    #[serde(alias = "host_display_name", default)]
    pub host_display_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    #[serde(default = "default_pool_min")]
    pub min: usize,
    #[serde(default = "default_pool_max")]
    pub max: usize,
    #[serde(alias = "idle_timeout_ms", default = "default_pool_idle_timeout")]
    pub idle_timeout_ms: u64,
    #[serde(alias = "max_acquire_attempts", default = "default_max_acquire_attempts")]
    pub max_acquire_attempts: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionConfig {
    #[serde(alias = "idle_timeout_ms", default = "default_transaction_idle_timeout")]
    pub idle_timeout_ms: u64,
    #[serde(alias = "reap_interval_ms", default = "default_reap_interval")]
    pub reap_interval_ms: u64,
}

impl Default for TransactionTracerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            record_sql: RecordSql::default(),
            explain_threshold_ms: 0,
        }
    }
}

impl Default for SlowSqlConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            max_samples: default_max_samples(),
        }
    }
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            instance_reporting: default_enabled(),
            database_name_reporting: default_enabled(),
            host_display_name: None,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: default_pool_min(),
            max: default_pool_max(),
            idle_timeout_ms: default_pool_idle_timeout(),
            max_acquire_attempts: default_max_acquire_attempts(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_transaction_idle_timeout(),
            reap_interval_ms: default_reap_interval(),
        }
    }
}

// Default value functions
fn default_enabled() -> bool {
    true
}

fn default_max_samples() -> usize {
    10
}

fn default_pool_min() -> usize {
    2
}

fn default_pool_max() -> usize {
    6
}

fn default_pool_idle_timeout() -> u64 {
    250
}

fn default_max_acquire_attempts() -> u32 {
    10
}

fn default_transaction_idle_timeout() -> u64 {
    60_000
}

fn default_reap_interval() -> u64 {
    1_000
}

impl TracerConfig {
    pub fn explain_threshold(&self) -> Duration {
        Duration::from_millis(self.transaction_tracer.explain_threshold_ms)
    }

    pub fn transaction_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction.idle_timeout_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.transaction.reap_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TracerConfig::default();
        assert!(config.slow_sql.enabled);
        assert_eq!(config.pool.max_acquire_attempts, 10);
        assert_eq!(config.transaction_tracer.record_sql, RecordSql::Obfuscated);
        assert_eq!(config.explain_threshold(), Duration::ZERO);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TracerConfig = serde_json::from_str(
            r#"{"transactionTracer": {"recordSql": "raw"}, "pool": {"max": 12}}"#,
        )
        .unwrap();
        assert_eq!(config.transaction_tracer.record_sql, RecordSql::Raw);
        assert!(config.transaction_tracer.enabled);
        assert_eq!(config.pool.max, 12);
        assert_eq!(config.pool.min, 2);
    }

    #[test]
    fn test_snake_case_keys_accepted() {
        // Environment overrides arrive in snake_case
        let config: TracerConfig = serde_json::from_str(
            r#"{"slow_sql": {"max_samples": 3}, "pool": {"max_acquire_attempts": 4}}"#,
        )
        .unwrap();
        assert_eq!(config.slow_sql.max_samples, 3);
        assert_eq!(config.pool.max_acquire_attempts, 4);
    }
}
