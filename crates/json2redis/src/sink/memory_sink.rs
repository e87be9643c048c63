// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hashbrown::HashMap;

use super::Sink;
use crate::errors::SinkError;

/// In-process sink that records every batch it receives and the key space they produce.
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    state: Arc<Mutex<MemoryState>>,
    failing: Arc<AtomicBool>,
}

#[derive(Debug, Default)]
struct MemoryState {
    batches: Vec<Vec<(String, Vec<u8>)>>,
    store: HashMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// While failing, every batch is rejected and nothing is recorded.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Accepted batches, in the order their writes completed.
    pub fn batches(&self) -> Vec<Vec<(String, Vec<u8>)>> {
        self.lock().batches.clone()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().store.get(key).cloned()
    }

    /// Number of distinct keys stored.
    pub fn len(&self) -> usize {
        self.lock().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().store.is_empty()
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn multi_set(&self, pairs: &[(&str, &[u8])]) -> Result<(), SinkError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(SinkError::Rejected("memory sink is failing".to_string()));
        }

        let batch: Vec<(String, Vec<u8>)> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.to_vec()))
            .collect();

        let mut state = self.lock();
        for (key, value) in &batch {
            state.store.insert(key.clone(), value.clone());
        }
        state.batches.push(batch);
        Ok(())
    }

    async fn ping(&self) -> Result<(), SinkError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(SinkError::Rejected("memory sink is failing".to_string()));
        }
        Ok(())
    }
}
