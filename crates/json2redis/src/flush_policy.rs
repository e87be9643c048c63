// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::errors;

/// When to cut the accumulation buffer into a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    batch_size: usize,
    flush_interval: Duration,
}

impl FlushPolicy {
    pub fn new(batch_size: usize, flush_interval: Duration) -> Result<Self, errors::Creation> {
        if batch_size == 0 {
            return Err(errors::Creation::ZeroBatchSize);
        }
        if flush_interval.is_zero() {
            return Err(errors::Creation::ZeroFlushInterval);
        }
        Ok(Self {
            batch_size,
            flush_interval,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    /// A full buffer flushes eagerly; a non-empty one flushes once it is older than the interval.
    /// An empty buffer never flushes.
    pub fn should_flush(&self, buffered: usize, since_last_flush: Duration) -> bool {
        buffered >= self.batch_size || (buffered > 0 && since_last_flush > self.flush_interval)
    }
}
