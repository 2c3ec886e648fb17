// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The pipeline as the host sees it: journal entries in, lifecycle control on top.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{
    normalize_endpoint, Credential, PipelineConfig, SharedConfig, DEFAULT_IDLE_INTERVAL,
    DEFAULT_STOP_TIMEOUT,
};
use crate::dispatcher::{Dispatcher, DispatcherHandle, DispatcherState};
use crate::error::RelayError;
use crate::event::{is_exploration_event, JournalContext, RawEvent};
use crate::queue::RecordQueue;
use crate::sender::{BatchSender, HttpSender};
use crate::transform::transform;

/// Owns the queue, the settings and the background dispatcher.
///
/// `journal_entry` is synchronous and never blocks on delivery. Start, stop and reconfiguration
/// are serialized through the worker slot, and disabling always stops the dispatcher before the
/// queue is cleared.
pub struct ExplorationRelay<S: ?Sized = HttpSender> {
    config: SharedConfig,
    queue: Arc<RecordQueue>,
    sender: Arc<S>,
    worker: Mutex<Option<DispatcherHandle>>,
}

impl ExplorationRelay<HttpSender> {
    pub fn new(config: PipelineConfig) -> Result<Self, RelayError> {
        let sender = HttpSender::new(config.request_timeout)
            .map_err(|e| RelayError::HttpClient(e.to_string()))?;
        Ok(Self::with_sender(config, Arc::new(sender)))
    }
}

impl<S: BatchSender + ?Sized + 'static> ExplorationRelay<S> {
    /// Builds a stopped relay. Call [`start`](Self::start) or [`configure`](Self::configure).
    pub fn with_sender(config: PipelineConfig, sender: Arc<S>) -> Self {
        Self {
            config: SharedConfig::new(config),
            queue: Arc::new(RecordQueue::new()),
            sender,
            worker: Mutex::new(None),
        }
    }

    /// Entry point for every journal entry the host reads. Fire and forget.
    pub fn journal_entry(&self, context: &JournalContext<'_>, entry: &RawEvent) {
        if context.is_beta || !self.config.is_active() {
            return;
        }
        let Some(event) = entry.get("event").and_then(Value::as_str) else {
            return;
        };
        if !is_exploration_event(event) {
            return;
        }

        debug!(
            system = ?context.system,
            station = ?context.station,
            "Processing exploration event: {event}"
        );
        match transform(entry, context.commander) {
            Some(record) => {
                self.queue.enqueue(record);
                debug!("Queued exploration event: {event}");
            }
            None => debug!("No exploration record built for event: {event}"),
        }
    }

    /// Applies the host's settings.
    ///
    /// Enabled with an endpoint starts the dispatcher; anything else stops it and drops every
    /// pending record. An endpoint that is not an http(s) URL is treated as a disable and reported.
    pub async fn configure(
        &self,
        enabled: bool,
        endpoint: &str,
        credential: Option<&str>,
    ) -> Result<(), RelayError> {
        let mut worker = self.worker.lock().await;
        let mut config = self
            .config
            .snapshot()
            .map_err(|_| RelayError::SettingsPoisoned)?;
        config.enabled = enabled;
        config.endpoint = normalize_endpoint(endpoint);
        config.credential = credential.and_then(Credential::new);
        self.apply(&mut worker, config).await
    }

    /// Replaces every setting, tunables included, with the same start/stop rules as `configure`.
    pub async fn reconfigure(&self, config: PipelineConfig) -> Result<(), RelayError> {
        let mut worker = self.worker.lock().await;
        self.apply(&mut worker, config).await
    }

    async fn apply(
        &self,
        worker: &mut Option<DispatcherHandle>,
        mut config: PipelineConfig,
    ) -> Result<(), RelayError> {
        let validation = config.validate();
        if validation.is_err() {
            config.enabled = false;
        }
        let active = config.is_active();
        self.config.replace(config)?;

        if active {
            self.start_locked(worker).await;
        } else {
            self.stop_locked(worker, true).await;
            let dropped = self.queue.clear();
            if dropped > 0 {
                info!("Discarded {dropped} pending exploration records");
            }
        }
        validation
    }

    /// Starts the dispatcher if the relay is enabled and it is not already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if self.config.is_active() {
            self.start_locked(&mut worker).await;
        } else {
            debug!("Exploration relay is disabled, not starting worker");
        }
    }

    /// Stops the dispatcher, waiting at most the configured stop timeout. Queued records are kept,
    /// and so are records the dispatcher had taken but not yet sent.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        self.stop_locked(&mut worker, false).await;
    }

    pub async fn state(&self) -> DispatcherState {
        match self.worker.lock().await.as_ref() {
            Some(handle) if !handle.is_finished() && !handle.is_stopping() => {
                DispatcherState::Running
            }
            _ => DispatcherState::Stopped,
        }
    }

    /// Records not yet attempted: queued, or taken by the dispatcher and not yet sent.
    pub fn pending(&self) -> usize {
        self.queue.outstanding()
    }

    /// Waits until every pending record has had its delivery attempt, giving up after `limit`
    /// or as soon as the dispatcher is not running. Returns true when nothing is left pending.
    pub async fn drain(&self, limit: Duration) -> bool {
        let idle = self
            .config
            .snapshot()
            .map(|config| config.idle_interval)
            .unwrap_or(DEFAULT_IDLE_INTERVAL);
        let wait = async {
            while self.pending() > 0 {
                if self.state().await == DispatcherState::Stopped {
                    return false;
                }
                sleep(idle).await;
            }
            true
        };
        tokio::time::timeout(limit, wait).await.unwrap_or(false)
    }

    pub fn config(&self) -> Result<PipelineConfig, RelayError> {
        self.config
            .snapshot()
            .map_err(|_| RelayError::SettingsPoisoned)
    }

    async fn start_locked(&self, worker: &mut Option<DispatcherHandle>) {
        if let Some(handle) = worker.take() {
            if !handle.is_finished() && !handle.is_stopping() {
                *worker = Some(handle);
                return;
            }
            // A stop that timed out leaves its loop mid-delivery; only one may deliver at a time.
            if !handle.is_finished() {
                info!("Waiting for the previous exploration data worker to finish");
            }
            handle.join().await;
        }
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.queue),
            self.config.clone(),
            Arc::clone(&self.sender),
            CancellationToken::new(),
        );
        *worker = Some(dispatcher.spawn());
        info!("Exploration data worker started");
    }

    /// A handle that does not stop in time stays in the slot as stopping.
    async fn stop_locked(&self, worker: &mut Option<DispatcherHandle>, discard: bool) {
        let Some(handle) = worker.take() else {
            return;
        };
        let timeout = self
            .config
            .snapshot()
            .map(|config| config.stop_timeout)
            .unwrap_or(DEFAULT_STOP_TIMEOUT);
        match handle.stop(timeout, discard).await {
            Ok(()) => info!("Exploration data worker stopped"),
            Err(handle) => *worker = Some(handle),
        }
    }
}
