// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime configuration.
//!
//! Sources, lowest priority first: built-in defaults, an optional `conf.yaml` in the given
//! directory, then `JSON2REDIS_`-prefixed environment variables
//! (`JSON2REDIS_BATCH_SIZE=500`, `JSON2REDIS_REDIS=redis:6379`, ...).
//!
//! `buffersize` is accepted in both sources as the legacy name of `batch_size`. When a source
//! carries both, `batch_size` wins.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::value::{Dict, Uncased};
use figment::Figment;
use serde::Deserialize;

use crate::accumulator_service::AccumulatorConfig;
use crate::constants::{
    CONFIG_FILE_NAME, DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_HOST, DEFAULT_KEY_FIELD,
    DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_PORT, DEFAULT_REDIS_ADDR, DEFAULT_WRITE_TIMEOUT,
    ENV_PREFIX, MAX_POOL_CAPACITY, MAX_QUEUE_CAPACITY, TICKS_PER_FLUSH_INTERVAL,
};
use crate::errors::{ConfigError, Creation};
use crate::flush_policy::FlushPolicy;
use crate::listener::ListenerConfig;
use crate::sink::RedisConfig;

#[derive(Debug, PartialEq, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Redis address, `host:port`.
    pub redis: String,
    pub redis_password: Option<String>,
    pub redis_db: i64,
    pub batch_size: usize,
    /// Defaults to `batch_size`.
    pub queue_capacity: Option<usize>,
    pub flush_interval_ms: u64,
    /// Defaults to a tenth of the flush interval.
    pub tick_interval_ms: Option<u64>,
    pub write_timeout_ms: u64,
    pub key_field: String,
    /// Defaults to twice `batch_size`.
    pub pool_capacity: Option<usize>,
    pub max_content_length: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            redis: DEFAULT_REDIS_ADDR.to_string(),
            redis_password: None,
            redis_db: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            queue_capacity: None,
            flush_interval_ms: duration_to_millis(DEFAULT_FLUSH_INTERVAL),
            tick_interval_ms: None,
            write_timeout_ms: duration_to_millis(DEFAULT_WRITE_TIMEOUT),
            key_field: DEFAULT_KEY_FIELD.to_string(),
            pool_capacity: None,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            log_level: "info".to_string(),
        }
    }
}

const BATCH_SIZE_KEY: &str = "batch_size";
const LEGACY_BATCH_SIZE_KEY: &str = "buffersize";

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Loads and validates the configuration. A missing `conf.yaml` is not an error.
    pub fn load(config_directory: &Path) -> Result<Config, ConfigError> {
        let path = config_directory.join(CONFIG_FILE_NAME);
        let mut file: Dict = Figment::from(Yaml::file(path)).extract()?;
        if let Some(value) = file.remove(LEGACY_BATCH_SIZE_KEY) {
            file.entry(BATCH_SIZE_KEY.to_string()).or_insert(value);
        }

        let env = Env::prefixed(ENV_PREFIX).map(|key| {
            if key.as_str().eq_ignore_ascii_case(LEGACY_BATCH_SIZE_KEY) {
                Uncased::from(BATCH_SIZE_KEY)
            } else {
                key.into()
            }
        });

        let config: Config = Figment::new()
            .merge(Serialized::defaults(file))
            .merge(env)
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Creation> {
        self.accumulator_config()?;
        if self.write_timeout().is_zero() {
            return Err(Creation::ZeroWriteTimeout);
        }
        match self.pool_capacity() {
            0 => return Err(Creation::ZeroPoolCapacity),
            capacity if capacity > MAX_POOL_CAPACITY => {
                return Err(Creation::PoolCapacityTooLarge(capacity))
            }
            _ => {}
        }
        if self.key_field.is_empty() {
            return Err(Creation::EmptyKeyField);
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        match self.tick_interval_ms {
            Some(ms) => Duration::from_millis(ms),
            None => (self.flush_interval() / TICKS_PER_FLUSH_INTERVAL).max(Duration::from_millis(1)),
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
            .unwrap_or_else(|| self.batch_size.min(MAX_QUEUE_CAPACITY))
    }

    pub fn pool_capacity(&self) -> usize {
        self.pool_capacity
            .unwrap_or_else(|| self.batch_size.saturating_mul(2).min(MAX_POOL_CAPACITY))
    }

    pub fn accumulator_config(&self) -> Result<AccumulatorConfig, Creation> {
        let config = AccumulatorConfig {
            flush_policy: FlushPolicy::new(self.batch_size, self.flush_interval())?,
            tick_interval: self.tick_interval(),
            queue_capacity: self.queue_capacity(),
        };
        if config.tick_interval.is_zero() {
            return Err(Creation::ZeroTickInterval);
        }
        if config.queue_capacity == 0 {
            return Err(Creation::ZeroQueueCapacity);
        }
        if config.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(Creation::QueueCapacityTooLarge(config.queue_capacity));
        }
        Ok(config)
    }

    pub fn redis_config(&self) -> RedisConfig {
        RedisConfig {
            addr: self.redis.clone(),
            password: self.redis_password.clone(),
            db: self.redis_db,
        }
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            host: self.host.clone(),
            port: self.port,
            max_content_length: self.max_content_length,
        }
    }
}
