// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Buffering and batched-flush engine for keyed JSON payloads.
//!
//! Raw payloads enter through a bounded queue (fed by the HTTP [`listener`]), are keyed by an
//! identifier extracted from the JSON body and deduplicated into an accumulation buffer owned by
//! a single task ([`accumulator_service`]). When the buffer is full or old enough it is cut into
//! a batch and written to a [`sink::Sink`] by a detached task ([`flusher`]), one multi-set per
//! batch. Message buffers are recycled through a shared [`pool`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod accumulator;
pub mod accumulator_service;
pub mod config;
pub mod constants;
pub mod errors;
pub mod flush_policy;
pub mod flusher;
pub mod listener;
pub mod message;
pub mod pool;
pub mod sink;
