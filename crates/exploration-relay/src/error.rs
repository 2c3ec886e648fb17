// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// A raw journal event whose shape could not be projected into a record.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("field '{field}' is malformed: expected {expected}")]
    MalformedField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Outcome of a failed delivery attempt. None of these are retried.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("endpoint returned status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("request timed out")]
    TimedOut,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::TimedOut
        } else if err.is_connect() {
            DeliveryError::ConnectionFailed(err.to_string())
        } else {
            DeliveryError::Unexpected(err.to_string())
        }
    }
}

/// Errors raised inside a single dispatcher cycle. The loop backs off and resumes.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("pipeline settings lock is poisoned")]
    SettingsPoisoned,

    #[error("batch size must be greater than 0")]
    EmptyBatchLimit,
}

/// Errors returned to whoever owns the relay, never to journal callers.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("pipeline settings lock is poisoned")]
    SettingsPoisoned,

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
