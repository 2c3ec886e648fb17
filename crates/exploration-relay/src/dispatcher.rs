// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Background loop that turns queued records into delivered batches.
//!
//! Each cycle the dispatcher tops up its in-progress batch from the queue and flushes it when it
//! is full, or when it is non-empty and the flush interval has passed since the previous flush.
//! A flushed batch is handed to the [`BatchSender`] exactly once and then dropped, whatever the
//! outcome. Errors inside a cycle are logged and answered with a longer pause; they never end the
//! loop. Only cancellation does, and only between cycles. Records accumulated but not yet sent
//! when the loop ends go back to the front of the queue, unless the stop was a discard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PipelineConfig, SharedConfig, DEFAULT_ERROR_BACKOFF};
use crate::error::{DeliveryError, DispatchError};
use crate::event::StructuredRecord;
use crate::queue::RecordQueue;
use crate::sender::{BatchSender, DeliveryTarget};

/// Externally observable dispatcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Running,
}

pub struct Dispatcher<S: ?Sized> {
    queue: Arc<RecordQueue>,
    config: SharedConfig,
    sender: Arc<S>,
    cancel_token: CancellationToken,
    discard: Arc<AtomicBool>,
}

struct LoopState {
    batch: Vec<StructuredRecord>,
    last_flush: Instant,
    error_backoff: Duration,
}

impl<S: BatchSender + ?Sized + 'static> Dispatcher<S> {
    pub fn new(
        queue: Arc<RecordQueue>,
        config: SharedConfig,
        sender: Arc<S>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            config,
            sender,
            cancel_token,
            discard: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs the loop on the current tokio runtime.
    pub fn spawn(self) -> DispatcherHandle {
        let cancel_token = self.cancel_token.clone();
        let discard = Arc::clone(&self.discard);
        let task = tokio::spawn(self.run());
        DispatcherHandle {
            cancel_token,
            discard,
            task,
        }
    }

    pub async fn run(self) {
        debug!("Exploration dispatcher started");
        let mut state = LoopState {
            batch: Vec::new(),
            last_flush: Instant::now(),
            error_backoff: DEFAULT_ERROR_BACKOFF,
        };

        while !self.cancel_token.is_cancelled() {
            let pause = match self.run_cycle(&mut state).await {
                Ok(idle) => idle,
                Err(e) => {
                    error!("Error in exploration dispatcher cycle: {e}");
                    state.error_backoff
                }
            };

            tokio::select! {
                _ = sleep(pause) => {}
                _ = self.cancel_token.cancelled() => break,
            }
        }

        let unsent = std::mem::take(&mut state.batch);
        if !unsent.is_empty() {
            if self.discard.load(Ordering::Acquire) {
                debug!(
                    "Discarding {} unsent exploration records on shutdown",
                    unsent.len()
                );
                self.queue.release(unsent.len());
            } else {
                debug!(
                    "Returning {} unsent exploration records to the queue",
                    unsent.len()
                );
                self.queue.requeue_front(unsent);
            }
        }
        debug!("Exploration dispatcher stopped");
    }

    /// One accumulate-and-maybe-flush pass. Returns how long to idle afterwards.
    async fn run_cycle(&self, state: &mut LoopState) -> Result<Duration, DispatchError> {
        let now = Instant::now();
        let config = self.config.snapshot()?;
        state.error_backoff = config.error_backoff;
        let max = config.max_batch_size;
        if max == 0 {
            return Err(DispatchError::EmptyBatchLimit);
        }

        let room = max.saturating_sub(state.batch.len());
        if room > 0 {
            state.batch.extend(self.queue.drain_up_to(room));
        }

        let elapsed = now.saturating_duration_since(state.last_flush);
        if should_flush(state.batch.len(), max, elapsed, config.flush_interval) {
            // The limit may have shrunk since these records were taken.
            let rest = state.batch.split_off(max.min(state.batch.len()));
            let batch = std::mem::replace(&mut state.batch, rest);
            self.flush(&batch, &config).await;
            self.queue.release(batch.len());
            state.last_flush = now;
        }

        Ok(config.idle_interval)
    }

    async fn flush(&self, batch: &[StructuredRecord], config: &PipelineConfig) {
        if config.endpoint.is_empty() {
            warn!(
                "No exploration endpoint configured, dropping {} records",
                batch.len()
            );
            return;
        }
        let target = DeliveryTarget::from_config(config);
        debug!("Flushing {} exploration records", batch.len());
        log_delivery(self.sender.deliver(batch, &target).await, batch.len());
    }
}

/// A batch goes out when it is full, or when it has waited out the flush interval.
pub(crate) fn should_flush(
    len: usize,
    max_batch_size: usize,
    since_last_flush: Duration,
    flush_interval: Duration,
) -> bool {
    len >= max_batch_size || (len > 0 && since_last_flush >= flush_interval)
}

fn log_delivery(result: Result<(), DeliveryError>, count: usize) {
    match result {
        Ok(()) => info!("Successfully sent {count} exploration events"),
        Err(DeliveryError::Rejected { status, body }) => {
            warn!("Exploration API returned status {status}: {body}")
        }
        Err(DeliveryError::TimedOut) => error!("Timeout sending exploration data to API"),
        Err(DeliveryError::ConnectionFailed(e)) => {
            error!("Connection error sending exploration data to API: {e}")
        }
        Err(DeliveryError::Unexpected(e)) => {
            error!("Unexpected error sending exploration data: {e}")
        }
    }
}

/// Owner's side of a spawned dispatcher.
#[derive(Debug)]
pub struct DispatcherHandle {
    cancel_token: CancellationToken,
    discard: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl DispatcherHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// True once a stop has been requested, even if the loop is still finishing a delivery.
    pub fn is_stopping(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Signals the loop and waits up to `timeout` for it to finish its current cycle. With
    /// `discard`, records accumulated but not yet sent are dropped instead of requeued.
    ///
    /// Gives the handle back if the loop was still running when the wait gave up. It will exit
    /// on its own once the in-flight delivery completes; [`join`](Self::join) waits for that.
    pub async fn stop(mut self, timeout: Duration, discard: bool) -> Result<(), Self> {
        if discard {
            self.discard.store(true, Ordering::Release);
        }
        self.cancel_token.cancel();
        let joined = tokio::time::timeout(timeout, &mut self.task).await;
        match joined {
            Ok(result) => {
                if let Err(e) = result {
                    error!("Exploration dispatcher task failed: {e}");
                }
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Exploration dispatcher did not stop within {} ms, continuing",
                    timeout.as_millis()
                );
                Err(self)
            }
        }
    }

    /// Cancels the loop if needed and waits for it to exit, however long that takes.
    pub async fn join(self) {
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            error!("Exploration dispatcher task failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{record, RecordingSender, SlowSender};
    use reqwest::StatusCode;
    use serde_json::json;

    fn config(max_batch_size: usize) -> SharedConfig {
        SharedConfig::new(PipelineConfig {
            enabled: true,
            endpoint: "http://localhost:8080".to_string(),
            max_batch_size,
            ..Default::default()
        })
    }

    fn spawn(
        queue: &Arc<RecordQueue>,
        config: SharedConfig,
        sender: &Arc<RecordingSender>,
    ) -> DispatcherHandle {
        Dispatcher::new(
            Arc::clone(queue),
            config,
            Arc::clone(sender),
            CancellationToken::new(),
        )
        .spawn()
    }

    #[test]
    fn test_should_flush() {
        let interval = Duration::from_secs(30);
        assert!(should_flush(3, 3, Duration::ZERO, interval));
        assert!(should_flush(1, 10, interval, interval));
        assert!(!should_flush(1, 10, Duration::from_secs(29), interval));
        assert!(!should_flush(0, 10, Duration::from_secs(300), interval));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_batch_is_sent_without_waiting() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::default());
        for i in 0..3 {
            queue.enqueue(record(i));
        }

        let handle = spawn(&queue, config(3), &sender);
        sleep(Duration::from_millis(500)).await;

        assert_eq!(sender.batch_sizes(), vec![3]);
        assert!(queue.is_empty());
        assert!(handle.stop(Duration::from_secs(5), false).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_batch_waits_for_flush_interval() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::default());
        queue.enqueue(record(1));

        let handle = spawn(&queue, config(10), &sender);
        sleep(Duration::from_millis(29_500)).await;
        assert!(sender.batch_sizes().is_empty());

        sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.batch_sizes(), vec![1]);
        assert!(handle.stop(Duration::from_secs(5), false).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_never_exceed_limit() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::default());
        for i in 0..7 {
            queue.enqueue(record(i));
        }

        let handle = spawn(&queue, config(3), &sender);
        sleep(Duration::from_millis(2_500)).await;
        assert_eq!(sender.batch_sizes(), vec![3, 3]);

        sleep(Duration::from_secs(30)).await;
        assert_eq!(sender.batch_sizes(), vec![3, 3, 1]);

        let delivered: Vec<_> = sender
            .batches
            .lock()
            .expect("lock poisoned")
            .iter()
            .flatten()
            .map(|r| r.system_address().clone())
            .collect();
        assert_eq!(delivered, (0..7).map(|i| json!(i)).collect::<Vec<_>>());
        assert!(handle.stop(Duration::from_secs(5), false).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_batches_are_dropped_and_loop_keeps_running() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::failing(
            StatusCode::INTERNAL_SERVER_ERROR,
        ));
        queue.enqueue(record(1));
        queue.enqueue(record(2));

        let handle = spawn(&queue, config(2), &sender);
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(sender.batch_sizes(), vec![2]);

        queue.enqueue(record(3));
        queue.enqueue(record(4));
        sleep(Duration::from_secs(5)).await;

        // One attempt per batch, no retry of the first.
        assert_eq!(sender.batch_sizes(), vec![2, 2]);
        {
            let batches = sender.batches.lock().expect("lock poisoned");
            assert_eq!(batches[1][0].system_address(), &json!(3));
        }
        assert!(!handle.is_finished());
        assert!(handle.stop(Duration::from_secs(5), false).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_accumulated_records_to_queue() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::default());
        queue.enqueue(record(1));
        queue.enqueue(record(2));

        let handle = spawn(&queue, config(10), &sender);
        sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.outstanding(), 2);
        queue.enqueue(record(3));

        assert!(handle.stop(Duration::from_secs(5), false).await.is_ok());
        assert!(sender.batch_sizes().is_empty());
        let addresses: Vec<_> = queue
            .drain_up_to(10)
            .iter()
            .map(|r| r.system_address().clone())
            .collect();
        assert_eq!(addresses, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discarding_stop_drops_accumulated_records() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::default());
        queue.enqueue(record(1));
        queue.enqueue(record(2));

        let handle = spawn(&queue, config(10), &sender);
        sleep(Duration::from_secs(2)).await;

        assert!(handle.stop(Duration::from_secs(5), true).await.is_ok());
        assert_eq!(queue.outstanding(), 0);
        sleep(Duration::from_secs(60)).await;
        assert!(sender.batch_sizes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_gives_up_while_delivery_is_in_flight() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(SlowSender::new(Duration::from_secs(20)));
        queue.enqueue(record(1));

        let handle = Dispatcher::new(
            Arc::clone(&queue),
            config(1),
            Arc::clone(&sender),
            CancellationToken::new(),
        )
        .spawn();
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(sender.in_flight(), 1);

        let handle = handle
            .stop(Duration::from_secs(5), false)
            .await
            .expect_err("delivery outlasts the stop timeout");
        assert!(handle.is_stopping());
        assert!(!handle.is_finished());
        assert_eq!(queue.outstanding(), 1);

        handle.join().await;
        assert_eq!(sender.delivered(), vec![json!(1)]);
        assert_eq!(sender.max_in_flight(), 1);
        assert_eq!(queue.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_errors_back_off_without_ending_loop() {
        let queue = Arc::new(RecordQueue::new());
        let sender = Arc::new(RecordingSender::default());
        let config = config(10);
        config.poison();
        queue.enqueue(record(1));

        let handle = spawn(&queue, config, &sender);
        sleep(Duration::from_secs(20)).await;

        // Every cycle fails before touching the queue.
        assert!(!handle.is_finished());
        assert_eq!(queue.len(), 1);
        assert!(sender.batch_sizes().is_empty());
        assert!(handle.stop(Duration::from_secs(5), false).await.is_ok());
    }
}
