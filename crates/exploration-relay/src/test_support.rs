// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::DeliveryError;
use crate::event::{RecordKind, StructuredRecord};
use crate::sender::{BatchSender, DeliveryTarget};

/// Records every batch it is handed; optionally rejects them all.
#[derive(Default)]
pub(crate) struct RecordingSender {
    pub(crate) batches: Mutex<Vec<Vec<StructuredRecord>>>,
    pub(crate) urls: Mutex<Vec<String>>,
    status: Option<StatusCode>,
}

impl RecordingSender {
    pub(crate) fn failing(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub(crate) fn batch_sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(Vec::len)
            .collect()
    }
}

#[async_trait]
impl BatchSender for RecordingSender {
    async fn deliver(
        &self,
        batch: &[StructuredRecord],
        target: &DeliveryTarget,
    ) -> Result<(), DeliveryError> {
        self.batches
            .lock()
            .expect("lock poisoned")
            .push(batch.to_vec());
        self.urls
            .lock()
            .expect("lock poisoned")
            .push(target.url.clone());
        match self.status {
            None => Ok(()),
            Some(status) => Err(DeliveryError::Rejected {
                status,
                body: "nope".to_string(),
            }),
        }
    }
}

/// Takes `delay` to answer every delivery and tracks how many overlap.
pub(crate) struct SlowSender {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delivered: Mutex<Vec<Value>>,
}

impl SlowSender {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// System addresses of every delivered record, in delivery order.
    pub(crate) fn delivered(&self) -> Vec<Value> {
        self.delivered.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl BatchSender for SlowSender {
    async fn deliver(
        &self,
        batch: &[StructuredRecord],
        _target: &DeliveryTarget,
    ) -> Result<(), DeliveryError> {
        let overlapping = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(overlapping, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.delivered
            .lock()
            .expect("lock poisoned")
            .extend(batch.iter().map(|r| r.system_address().clone()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn record(system_address: u64) -> StructuredRecord {
    StructuredRecord::new(
        "Jameson",
        "3310-01-01T00:00:00Z".to_string(),
        RecordKind::SystemEntry,
        json!(system_address),
        None,
        Map::new(),
    )
}
