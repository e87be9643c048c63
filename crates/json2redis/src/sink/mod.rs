// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Key-value stores that batches are written to.

use async_trait::async_trait;

use crate::errors::SinkError;

pub mod memory_sink;
pub mod redis_sink;

pub use memory_sink::MemorySink;
pub use redis_sink::{RedisConfig, RedisSink};

#[async_trait]
pub trait Sink: Send + Sync {
    /// Stores every (key, value) pair in a single round trip. The batch succeeds or fails as a
    /// whole; there is no partial failure reporting.
    async fn multi_set(&self, pairs: &[(&str, &[u8])]) -> Result<(), SinkError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), SinkError>;
}
