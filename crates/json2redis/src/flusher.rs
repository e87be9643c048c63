// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Writes cut batches to the sink.
//!
//! Each batch is written with a single multi-set bounded by a timeout. There is no retry: a batch
//! the sink rejects, or that times out, is logged and dropped. Once the write has finished, one way
//! or the other, the batch's messages go back to the pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, error};

use crate::accumulator::Batch;
use crate::errors::{self, SinkError};
use crate::pool::MessagePool;
use crate::sink::Sink;

#[derive(Clone)]
pub struct Flusher {
    sink: Arc<dyn Sink>,
    pool: Arc<MessagePool>,
    write_timeout: Duration,
}

pub struct FlusherConfig {
    pub sink: Arc<dyn Sink>,
    pub pool: Arc<MessagePool>,
    pub write_timeout: Duration,
}

impl Flusher {
    pub fn new(config: FlusherConfig) -> Result<Self, errors::Creation> {
        if config.write_timeout.is_zero() {
            return Err(errors::Creation::ZeroWriteTimeout);
        }
        Ok(Flusher {
            sink: config.sink,
            pool: config.pool,
            write_timeout: config.write_timeout,
        })
    }

    /// Writes `batch` and recycles its messages. Returns the number of entries written.
    pub async fn flush(&self, batch: Batch) -> Result<usize, SinkError> {
        let n_entries = batch.len();
        let cycle = batch.cycle();
        if n_entries == 0 {
            return Ok(0);
        }

        debug!("Flushing batch {cycle} with {n_entries} entries");

        let result = {
            let pairs = batch.pairs();
            match timeout(self.write_timeout, self.sink.multi_set(&pairs)).await {
                Ok(result) => result,
                Err(_) => Err(SinkError::Timeout(self.write_timeout)),
            }
        };

        // the write is over, nothing borrows the payloads anymore
        self.pool.release_all(batch.into_messages());

        match result {
            Ok(()) => {
                debug!("Successfully flushed batch {cycle} with {n_entries} entries");
                Ok(n_entries)
            }
            Err(e) => {
                error!("Failed to write batch {cycle}, dropping {n_entries} entries: {e}");
                Err(e)
            }
        }
    }
}
