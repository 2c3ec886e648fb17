// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::{Credential, PipelineConfig};
use crate::error::DeliveryError;
use crate::event::StructuredRecord;

/// Where and how one batch is delivered, captured from a config snapshot.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    pub url: String,
    pub credential: Option<Credential>,
    pub timeout: Duration,
}

impl DeliveryTarget {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            url: config.events_url(),
            credential: config.credential.clone(),
            timeout: config.request_timeout,
        }
    }
}

#[async_trait]
pub trait BatchSender: Send + Sync {
    /// Makes exactly one delivery attempt for `batch`. Implementations must not retry.
    async fn deliver(
        &self,
        batch: &[StructuredRecord],
        target: &DeliveryTarget,
    ) -> Result<(), DeliveryError>;
}

/// Posts batches as a JSON array to the exploration API.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Unexpected(format!("unable to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn headers(credential: Option<&Credential>) -> Result<HeaderMap, DeliveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(credential) = credential {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", credential.expose()))
                .map_err(|_| {
                    DeliveryError::Unexpected("credential is not a valid header value".to_string())
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl BatchSender for HttpSender {
    async fn deliver(
        &self,
        batch: &[StructuredRecord],
        target: &DeliveryTarget,
    ) -> Result<(), DeliveryError> {
        let headers = Self::headers(target.credential.as_ref())?;

        let start = Instant::now();
        let response = self
            .client
            .post(&target.url)
            .headers(headers)
            .timeout(target.timeout)
            .json(batch)
            .send()
            .await?;
        let status = response.status();
        debug!(
            "Exploration API answered {status} in {} ms",
            start.elapsed().as_millis()
        );

        if status == StatusCode::OK {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Rejected { status, body })
    }
}
