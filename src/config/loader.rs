use super::schema::TracerConfig;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

const ENV_PREFIX: &str = "TXN_TRACER_";

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

pub async fn load_from_env_or_file() -> Result<TracerConfig> {
    let config: TracerConfig = Figment::new()
        .merge(Toml::file("txn-tracer.toml"))
        .merge(Json::file("txn-tracer.json"))
        .merge(Yaml::file("txn-tracer.yaml"))
        .merge(Yaml::file("txn-tracer.yml"))
        // TXN_TRACER_POOL__MAX=8 style overrides
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub async fn load_from_path<P: AsRef<Path>>(path: P) -> Result<TracerConfig> {
    let path = path.as_ref();

    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => Figment::new().merge(Toml::file(path)),
        Some("json") => Figment::new().merge(Json::file(path)),
        Some("yaml") | Some("yml") => Figment::new().merge(Yaml::file(path)),
        _ => {
            return Err(ConfigError::Parse(
                "Unsupported config file format. Use .toml, .json, .yaml, or .yml".into(),
            )
            .into())
        }
    };

    let config: TracerConfig = figment
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    validate(&config)?;
    apply_env_substitutions(config)
}

pub fn validate(config: &TracerConfig) -> Result<()> {
    if config.pool.max == 0 {
        return Err(ConfigError::Validation("Pool max must be greater than 0".into()).into());
    }

    if config.pool.min > config.pool.max {
        return Err(ConfigError::Validation(format!(
            "Pool min ({}) must not exceed max ({})",
            config.pool.min, config.pool.max
        ))
        .into());
    }

    if config.pool.max_acquire_attempts == 0 {
        return Err(ConfigError::Validation(
            "Max acquire attempts must be at least 1".into(),
        )
        .into());
    }

    if config.slow_sql.enabled && config.slow_sql.max_samples == 0 {
        return Err(ConfigError::Validation(
            "Slow SQL max samples must be greater than 0 when enabled".into(),
        )
        .into());
    }

    if config.transaction.reap_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "Transaction reap interval must be greater than 0".into(),
        )
        .into());
    }

    Ok(())
}

fn apply_env_substitutions(mut config: TracerConfig) -> Result<TracerConfig> {
    if let Some(name) = &mut config.datastore.host_display_name {
        *name = substitute_env_vars(name)?;
    }

    Ok(config)
}

fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                // ${VAR:-default}
                if let Some((name, default)) = var_name.split_once(":-") {
                    match std::env::var(name) {
                        Ok(value) => result = result.replace(&cap[0], &value),
                        Err(_) => result = result.replace(&cap[0], default),
                    }
                } else {
                    return Err(ConfigError::EnvVar(format!(
                        "Environment variable '{}' not found",
                        var_name
                    ))
                    .into());
                }
            }
        }
    }

    Ok(result)
}
