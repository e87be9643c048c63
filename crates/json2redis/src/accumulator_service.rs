// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Single-owner coordinating loop around the [`Accumulator`].
//!
//! ```text
//!    ┌────────────────────┐
//!    │ AccumulatorHandle  │ (Clone, one per producer)
//!    └─────────┬──────────┘
//!              │ bounded queue of raw payloads
//!              v
//!    ┌────────────────────┐   timer tick
//!    │ AccumulatorService │ <──────────
//!    │ owns the buffer    │
//!    └─────────┬──────────┘
//!              │ cut batch, detached task per flush
//!              v
//!    ┌────────────────────┐
//!    │      Flusher       │ ──> Sink (one multi-set per batch)
//!    └────────────────────┘
//! ```
//!
//! The service is the only reader and writer of the buffer and of the last-flush instant, so
//! neither is locked. After every payload and every tick it evaluates the [`FlushPolicy`]; a flush
//! detaches the buffer and spawns its write without awaiting it. A full queue makes producers wait,
//! which is the backpressure mechanism; nothing is dropped on overflow.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

use crate::accumulator::{Accumulator, Batch};
use crate::constants::MAX_QUEUE_CAPACITY;
use crate::errors;
use crate::flush_policy::FlushPolicy;
use crate::flusher::Flusher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulatorConfig {
    pub flush_policy: FlushPolicy,
    /// Period of the timer that drives time-triggered flushes.
    pub tick_interval: Duration,
    /// Bound of the inbound payload queue.
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct AccumulatorHandle {
    tx: mpsc::Sender<Bytes>,
}

impl AccumulatorHandle {
    /// Enqueues a raw payload, waiting for room while the queue is full.
    ///
    /// Fails only once the service has stopped.
    pub async fn submit(&self, payload: Bytes) -> Result<(), mpsc::error::SendError<Bytes>> {
        self.tx.send(payload).await
    }

    pub fn try_submit(&self, payload: Bytes) -> Result<(), mpsc::error::TrySendError<Bytes>> {
        self.tx.try_send(payload)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct AccumulatorService {
    accumulator: Accumulator,
    flush_policy: FlushPolicy,
    tick_interval: Duration,
    rx: mpsc::Receiver<Bytes>,
    flusher: Flusher,
    in_flight: TaskTracker,
    cancel_token: CancellationToken,
}

impl AccumulatorService {
    pub fn new(
        config: AccumulatorConfig,
        accumulator: Accumulator,
        flusher: Flusher,
        cancel_token: CancellationToken,
    ) -> Result<(Self, AccumulatorHandle), errors::Creation> {
        if config.queue_capacity == 0 {
            return Err(errors::Creation::ZeroQueueCapacity);
        }
        if config.queue_capacity > MAX_QUEUE_CAPACITY {
            return Err(errors::Creation::QueueCapacityTooLarge(
                config.queue_capacity,
            ));
        }
        if config.tick_interval.is_zero() {
            return Err(errors::Creation::ZeroTickInterval);
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let service = Self {
            accumulator,
            flush_policy: config.flush_policy,
            tick_interval: config.tick_interval,
            rx,
            flusher,
            in_flight: TaskTracker::new(),
            cancel_token,
        };

        Ok((service, AccumulatorHandle { tx }))
    }

    /// Runs until cancelled or until every handle is dropped, then flushes what is left and waits
    /// for the writes still in flight.
    pub async fn run(mut self) {
        debug!("Accumulator service started");

        let mut last_flush = Instant::now();
        let mut ticker = interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel_token = self.cancel_token.clone();

        loop {
            tokio::select! {
                payload = self.rx.recv() => match payload {
                    Some(payload) => {
                        self.accept(&payload);
                        self.try_flush(&mut last_flush);
                    }
                    None => {
                        debug!("All accumulator handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => self.try_flush(&mut last_flush),
                _ = cancel_token.cancelled() => {
                    debug!("Accumulator service shutting down");
                    break;
                }
            }
        }

        self.shutdown(&mut last_flush).await;
        debug!("Accumulator service stopped");
    }

    fn accept(&mut self, payload: &[u8]) {
        if let Err(e) = self.accumulator.accept(payload) {
            error!("Dropping payload of {} bytes: {e}", payload.len());
        }
    }

    fn try_flush(&mut self, last_flush: &mut Instant) {
        let now = Instant::now();
        if self
            .flush_policy
            .should_flush(self.accumulator.len(), now.duration_since(*last_flush))
        {
            let batch = self.accumulator.cut();
            *last_flush = now;
            self.dispatch(batch);
        }
    }

    fn dispatch(&self, batch: Batch) {
        debug!(
            "Dispatching batch {} with {} entries",
            batch.cycle(),
            batch.len()
        );
        let flusher = self.flusher.clone();
        self.in_flight.spawn(async move {
            // failures are logged by the flusher
            let _ = flusher.flush(batch).await;
        });
    }

    async fn shutdown(&mut self, last_flush: &mut Instant) {
        // take what producers already enqueued
        self.rx.close();
        while let Some(payload) = self.rx.recv().await {
            self.accept(&payload);
            self.try_flush(last_flush);
        }

        if !self.accumulator.is_empty() {
            let batch = self.accumulator.cut();
            self.dispatch(batch);
        }

        self.in_flight.close();
        if !self.in_flight.is_empty() {
            debug!("Waiting for {} in-flight writes", self.in_flight.len());
        }
        self.in_flight.wait().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SinkError;
    use crate::flusher::FlusherConfig;
    use crate::message::KeyExtractor;
    use crate::pool::MessagePool;
    use crate::sink::{MemorySink, Sink};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::time::{sleep, timeout};
    use tracing_test::traced_test;

    struct Harness {
        handle: AccumulatorHandle,
        cancel_token: CancellationToken,
        service_task: tokio::task::JoinHandle<()>,
        pool: Arc<MessagePool>,
    }

    fn build(
        sink: Arc<dyn Sink>,
        batch_size: usize,
        flush_interval: Duration,
        queue_capacity: usize,
    ) -> (AccumulatorService, AccumulatorHandle, Arc<MessagePool>) {
        let pool = Arc::new(MessagePool::new(64).unwrap());
        let accumulator = Accumulator::new(KeyExtractor::new("uuid"), Arc::clone(&pool), 16);
        let flusher = Flusher::new(FlusherConfig {
            sink,
            pool: Arc::clone(&pool),
            write_timeout: Duration::from_secs(60),
        })
        .unwrap();
        let config = AccumulatorConfig {
            flush_policy: FlushPolicy::new(batch_size, flush_interval).unwrap(),
            tick_interval: flush_interval / 10,
            queue_capacity,
        };
        let (service, handle) =
            AccumulatorService::new(config, accumulator, flusher, CancellationToken::new())
                .expect("failed to create accumulator service");
        (service, handle, pool)
    }

    fn start(sink: Arc<dyn Sink>, batch_size: usize, flush_interval: Duration) -> Harness {
        let (service, handle, pool) = build(sink, batch_size, flush_interval, 8);
        let cancel_token = service.cancel_token.clone();
        let service_task = tokio::spawn(service.run());

        Harness {
            handle,
            cancel_token,
            service_task,
            pool,
        }
    }

    async fn submit(handle: &AccumulatorHandle, payload: &str) {
        handle
            .submit(Bytes::copy_from_slice(payload.as_bytes()))
            .await
            .expect("failed to submit payload");
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(1)).await;
        }
        panic!("condition not met in time");
    }

    /// Hangs forever on any batch containing the key "slow".
    struct SlowKeySink {
        inner: MemorySink,
    }

    #[async_trait]
    impl Sink for SlowKeySink {
        async fn multi_set(&self, pairs: &[(&str, &[u8])]) -> Result<(), SinkError> {
            if pairs.iter().any(|(key, _)| *key == "slow") {
                std::future::pending::<()>().await;
            }
            self.inner.multi_set(pairs).await
        }

        async fn ping(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let pool = Arc::new(MessagePool::new(1).unwrap());
        let flusher = Flusher::new(FlusherConfig {
            sink: Arc::new(MemorySink::new()),
            pool: Arc::clone(&pool),
            write_timeout: Duration::from_secs(1),
        })
        .unwrap();
        let policy = FlushPolicy::new(1, Duration::from_secs(1)).unwrap();

        let zero_queue = AccumulatorService::new(
            AccumulatorConfig {
                flush_policy: policy,
                tick_interval: Duration::from_millis(100),
                queue_capacity: 0,
            },
            Accumulator::new(KeyExtractor::new("uuid"), Arc::clone(&pool), 1),
            flusher.clone(),
            CancellationToken::new(),
        );
        assert!(matches!(zero_queue, Err(errors::Creation::ZeroQueueCapacity)));

        let huge_queue = AccumulatorService::new(
            AccumulatorConfig {
                flush_policy: policy,
                tick_interval: Duration::from_millis(100),
                queue_capacity: usize::MAX / 4,
            },
            Accumulator::new(KeyExtractor::new("uuid"), Arc::clone(&pool), 1),
            flusher.clone(),
            CancellationToken::new(),
        );
        assert!(matches!(
            huge_queue,
            Err(errors::Creation::QueueCapacityTooLarge(_))
        ));

        let zero_tick = AccumulatorService::new(
            AccumulatorConfig {
                flush_policy: policy,
                tick_interval: Duration::ZERO,
                queue_capacity: 1,
            },
            Accumulator::new(KeyExtractor::new("uuid"), pool, 1),
            flusher,
            CancellationToken::new(),
        );
        assert!(matches!(zero_tick, Err(errors::Creation::ZeroTickInterval)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_triggered_flush() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 2, Duration::from_secs(1));

        submit(&harness.handle, r#"{"uuid":"a","payload":"x"}"#).await;
        submit(&harness.handle, r#"{"uuid":"b","payload":"y"}"#).await;

        wait_for(|| sink.batches().len() == 1).await;
        let batch = &sink.batches()[0];
        assert_eq!(batch.len(), 2);
        assert_eq!(sink.get("a"), Some(br#"{"uuid":"a","payload":"x"}"#.to_vec()));
        assert_eq!(sink.get("b"), Some(br#"{"uuid":"b","payload":"y"}"#.to_vec()));

        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
        assert_eq!(sink.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_trigger_cuts_before_next_identifier() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 2, Duration::from_secs(3600));

        for id in ["a", "b", "c", "d", "e"] {
            submit(&harness.handle, &format!(r#"{{"uuid":"{id}"}}"#)).await;
        }

        wait_for(|| sink.batches().len() == 2).await;
        for batch in sink.batches() {
            assert_eq!(batch.len(), 2);
        }

        // "e" is still buffered and goes out with the shutdown flush
        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
        let batches = sink.batches();
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec![("e".to_string(), br#"{"uuid":"e"}"#.to_vec())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_triggered_flush() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 100, Duration::from_secs(1));

        submit(&harness.handle, r#"{"uuid":"a","payload":"x"}"#).await;

        sleep(Duration::from_millis(950)).await;
        assert!(sink.batches().is_empty());

        sleep(Duration::from_millis(300)).await;
        wait_for(|| sink.batches().len() == 1).await;
        assert_eq!(
            sink.batches()[0],
            vec![("a".to_string(), br#"{"uuid":"a","payload":"x"}"#.to_vec())]
        );

        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_buffer_never_flushes() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 100, Duration::from_millis(100));

        sleep(Duration::from_secs(5)).await;
        assert!(sink.batches().is_empty());

        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
        assert!(sink.batches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_identifier_in_one_cycle() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 100, Duration::from_secs(1));

        submit(&harness.handle, r#"{"uuid":"a","payload":"x"}"#).await;
        submit(&harness.handle, r#"{"uuid":"a","payload":"z"}"#).await;

        sleep(Duration::from_millis(1_300)).await;
        wait_for(|| sink.batches().len() == 1).await;
        assert_eq!(
            sink.batches()[0],
            vec![("a".to_string(), br#"{"uuid":"a","payload":"z"}"#.to_vec())]
        );

        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_decode_errors_do_not_stall_the_loop() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 2, Duration::from_secs(1));

        submit(&harness.handle, r#"{"uuid":"a"}"#).await;
        submit(&harness.handle, "not json").await;
        submit(&harness.handle, r#"{"no_uuid":true}"#).await;
        submit(&harness.handle, r#"{"uuid":"b"}"#).await;

        wait_for(|| sink.batches().len() == 1).await;
        assert_eq!(sink.batches()[0].len(), 2);
        assert!(logs_contain("Dropping payload of 8 bytes"));
        assert!(logs_contain("identifier field 'uuid' is missing"));

        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_write_does_not_block_accumulation() {
        let memory = MemorySink::new();
        let sink = SlowKeySink {
            inner: memory.clone(),
        };
        let harness = start(Arc::new(sink), 1, Duration::from_secs(1));

        submit(&harness.handle, r#"{"uuid":"slow"}"#).await;
        submit(&harness.handle, r#"{"uuid":"a"}"#).await;
        submit(&harness.handle, r#"{"uuid":"b"}"#).await;

        wait_for(|| memory.len() == 2).await;
        assert_eq!(memory.batches().len(), 2);
        assert!(memory.get("slow").is_none());

        // the hanging write is abandoned once the write timeout passes
        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
        assert!(memory.get("slow").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_makes_producers_wait() {
        let sink = MemorySink::new();
        let (service, handle, _pool) =
            build(Arc::new(sink.clone()), 2, Duration::from_secs(3600), 1);
        let cancel_token = service.cancel_token.clone();

        handle
            .try_submit(Bytes::from_static(br#"{"uuid":"a"}"#))
            .expect("queue should have room");
        assert!(matches!(
            handle.try_submit(Bytes::from_static(br#"{"uuid":"x"}"#)),
            Err(mpsc::error::TrySendError::Full(_))
        ));

        let blocked = handle.submit(Bytes::from_static(br#"{"uuid":"b"}"#));
        tokio::pin!(blocked);
        assert!(timeout(Duration::from_millis(100), &mut blocked)
            .await
            .is_err());
        assert!(sink.batches().is_empty());

        let service_task = tokio::spawn(service.run());
        blocked.await.expect("submit failed once the queue drained");

        wait_for(|| sink.batches().len() == 1).await;
        assert_eq!(sink.batches()[0].len(), 2);
        assert!(sink.get("x").is_none());

        cancel_token.cancel();
        service_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_buffer_and_queue() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 100, Duration::from_secs(3600));

        submit(&harness.handle, r#"{"uuid":"a"}"#).await;
        submit(&harness.handle, r#"{"uuid":"b"}"#).await;
        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();

        assert_eq!(sink.len(), 2);
        assert!(harness.handle.is_closed());
        assert!(harness
            .handle
            .submit(Bytes::from_static(b"{\"uuid\":\"c\"}"))
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_stops_the_service() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 100, Duration::from_secs(3600));

        submit(&harness.handle, r#"{"uuid":"a"}"#).await;
        drop(harness.handle);
        harness.service_task.await.unwrap();

        assert_eq!(sink.get("a"), Some(br#"{"uuid":"a"}"#.to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_are_recycled_after_flush() {
        let sink = MemorySink::new();
        let harness = start(Arc::new(sink.clone()), 2, Duration::from_secs(1));

        submit(&harness.handle, r#"{"uuid":"a"}"#).await;
        submit(&harness.handle, r#"{"uuid":"b"}"#).await;
        wait_for(|| harness.pool.available() == 2).await;

        submit(&harness.handle, r#"{"uuid":"c"}"#).await;
        wait_for(|| harness.pool.available() == 1).await;

        harness.cancel_token.cancel();
        harness.service_task.await.unwrap();
        assert_eq!(sink.len(), 3);
    }
}
