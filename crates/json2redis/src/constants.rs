// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_REDIS_ADDR: &str = "127.0.0.1:6379";

/// Distinct identifiers per batch before an eager flush.
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Top-level JSON field holding the message identifier.
pub const DEFAULT_KEY_FIELD: &str = "uuid";

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 10 * 1024 * 1024;

/// The timer ticks this many times per flush interval, so a time-triggered flush is late by at
/// most a tenth of the interval.
pub const TICKS_PER_FLUSH_INTERVAL: u32 = 10;

/// The accumulation buffer reserves room for at most this many identifiers per cycle and grows
/// past it on demand.
pub const MAX_PREALLOCATED_ENTRIES: usize = 4096;

/// Upper bounds for the message pool and the inbound queue. Both default from the batch size,
/// capped at these values.
pub const MAX_POOL_CAPACITY: usize = 1 << 16;
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Payload buffers above this capacity are shrunk before going back to the pool.
pub const MAX_RETAINED_PAYLOAD_CAPACITY: usize = 64 * 1024;

pub const CONFIG_FILE_NAME: &str = "conf.yaml";
pub const ENV_PREFIX: &str = "JSON2REDIS_";
