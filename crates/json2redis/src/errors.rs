// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// A payload that cannot be keyed. The payload is dropped, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("identifier field '{0}' is missing")]
    MissingIdentifier(String),
    #[error("identifier field '{0}' is empty")]
    EmptyIdentifier(String),
}

/// A batch write that did not make it to the sink. The whole batch is dropped.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("write timed out after {0:?}")]
    Timeout(Duration),
    #[error("batch rejected: {0}")]
    Rejected(String),
}

/// Invalid runtime parameters for the accumulator service or the message pool.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Creation {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("flush interval must be greater than zero")]
    ZeroFlushInterval,
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
    #[error("write timeout must be greater than zero")]
    ZeroWriteTimeout,
    #[error("inbound queue capacity must be greater than zero")]
    ZeroQueueCapacity,
    #[error("message pool capacity must be greater than zero")]
    ZeroPoolCapacity,
    #[error(
        "inbound queue capacity {0} exceeds the maximum of {max}",
        max = crate::constants::MAX_QUEUE_CAPACITY
    )]
    QueueCapacityTooLarge(usize),
    #[error(
        "message pool capacity {0} exceeds the maximum of {max}",
        max = crate::constants::MAX_POOL_CAPACITY
    )]
    PoolCapacityTooLarge(usize),
    #[error("key field must not be empty")]
    EmptyKeyField,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] Creation),
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        ConfigError::Load(Box::new(e))
    }
}
