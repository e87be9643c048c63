// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Free list of reusable [`Message`] buffers.
//!
//! The accumulator acquires from the pool while any number of flush tasks release into it, so
//! the free list is a bounded lock-free queue. Releasing into a full pool drops the message.
//! A message is only ever released by value, which means a pooled message cannot still be
//! referenced by a buffer or by an in-flight batch.

use crossbeam_queue::ArrayQueue;

use crate::constants::{MAX_POOL_CAPACITY, MAX_RETAINED_PAYLOAD_CAPACITY};
use crate::errors;
use crate::message::Message;

#[derive(Debug)]
pub struct MessagePool {
    free: ArrayQueue<Message>,
}

impl MessagePool {
    pub fn new(capacity: usize) -> Result<Self, errors::Creation> {
        if capacity == 0 {
            return Err(errors::Creation::ZeroPoolCapacity);
        }
        if capacity > MAX_POOL_CAPACITY {
            return Err(errors::Creation::PoolCapacityTooLarge(capacity));
        }
        Ok(Self {
            free: ArrayQueue::new(capacity),
        })
    }

    /// Returns a cleared message, recycled if one is available.
    pub fn acquire(&self) -> Message {
        self.free.pop().unwrap_or_default()
    }

    /// Clears `message` and keeps it for reuse.
    pub fn release(&self, mut message: Message) {
        message.clear();
        if message.payload.capacity() > MAX_RETAINED_PAYLOAD_CAPACITY {
            message.payload.shrink_to(MAX_RETAINED_PAYLOAD_CAPACITY);
        }
        // full pool: let it drop
        let _ = self.free.push(message);
    }

    pub fn release_all(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.release(message);
        }
    }

    /// Number of messages currently available for reuse.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }
}
