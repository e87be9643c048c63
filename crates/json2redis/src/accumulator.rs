// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accumulation buffer: keyed, deduplicated messages for the current cycle.

use std::hash::BuildHasher;
use std::sync::Arc;

use hashbrown::hash_table::Entry;
use hashbrown::{DefaultHashBuilder, HashTable};

use crate::constants::MAX_PREALLOCATED_ENTRIES;
use crate::errors::DecodeError;
use crate::message::{KeyExtractor, Message};
use crate::pool::MessagePool;

/// Messages of one accumulation cycle, at most one per identifier.
///
/// Owned by a single service task, which is its only reader and writer.
pub struct Accumulator {
    entries: HashTable<Message>,
    hasher: DefaultHashBuilder,
    extractor: KeyExtractor,
    pool: Arc<MessagePool>,
    capacity_hint: usize,
    cycle: u64,
}

impl Accumulator {
    /// `capacity_hint` is the expected number of identifiers per cycle, usually the batch size.
    /// At most [`MAX_PREALLOCATED_ENTRIES`] of it is reserved up front.
    pub fn new(extractor: KeyExtractor, pool: Arc<MessagePool>, capacity_hint: usize) -> Self {
        let capacity_hint = capacity_hint.min(MAX_PREALLOCATED_ENTRIES);
        Self {
            entries: HashTable::with_capacity(capacity_hint),
            hasher: DefaultHashBuilder::default(),
            extractor,
            pool,
            capacity_hint,
            cycle: 0,
        }
    }

    /// Keys `raw` and stores it, replacing any message with the same identifier.
    ///
    /// On a decode error nothing is stored and the buffer is unchanged.
    pub fn accept(&mut self, raw: &[u8]) -> Result<(), DecodeError> {
        let mut message = self.pool.acquire();
        if let Err(e) = self.extractor.extract_into(raw, &mut message.identifier) {
            self.pool.release(message);
            return Err(e);
        }
        message.payload.extend_from_slice(raw);

        if let Some(replaced) = self.insert(message) {
            self.pool.release(replaced);
        }
        Ok(())
    }

    fn insert(&mut self, message: Message) -> Option<Message> {
        let hasher = &self.hasher;
        let hash = hasher.hash_one(message.identifier.as_str());
        match self.entries.entry(
            hash,
            |resident| resident.identifier == message.identifier,
            |resident| hasher.hash_one(resident.identifier.as_str()),
        ) {
            Entry::Occupied(mut entry) => Some(std::mem::replace(entry.get_mut(), message)),
            Entry::Vacant(entry) => {
                entry.insert(message);
                None
            }
        }
    }

    pub fn get(&self, identifier: &str) -> Option<&Message> {
        let hash = self.hasher.hash_one(identifier);
        self.entries
            .find(hash, |resident| resident.identifier == identifier)
    }

    /// Number of distinct identifiers in the current cycle.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Detaches the current buffer as a batch and starts a new, empty cycle.
    pub fn cut(&mut self) -> Batch {
        let entries = std::mem::replace(
            &mut self.entries,
            HashTable::with_capacity(self.capacity_hint),
        );
        self.cycle += 1;
        Batch {
            cycle: self.cycle,
            entries,
        }
    }
}

/// The detached contents of one accumulation cycle.
#[derive(Debug)]
pub struct Batch {
    cycle: u64,
    entries: HashTable<Message>,
}

impl Batch {
    /// Sequence number of the cycle this batch was cut from, starting at 1.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flat (identifier, payload) view borrowed from the batch. While it is alive the messages
    /// cannot be released.
    pub fn pairs(&self) -> Vec<(&str, &[u8])> {
        self.entries
            .iter()
            .map(|message| (message.identifier.as_str(), message.payload.as_slice()))
            .collect()
    }

    pub fn into_messages(self) -> impl Iterator<Item = Message> {
        self.entries.into_iter()
    }
}
