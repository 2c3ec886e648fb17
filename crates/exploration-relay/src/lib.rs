// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Collects exploration journal events (system arrivals and body scans), normalizes them and
//! forwards them in batches to a remote exploration API.
//!
//! ```text
//! journal_entry -> transform -> RecordQueue -> Dispatcher -> BatchSender -> POST {endpoint}/exploration/events
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod queue;
pub mod relay;
pub mod sender;
pub mod transform;

#[cfg(test)]
mod test_support;

pub use config::{Credential, PipelineConfig};
pub use dispatcher::DispatcherState;
pub use error::{DeliveryError, RelayError};
pub use event::{JournalContext, RawEvent, RecordKind, StructuredRecord};
pub use relay::ExplorationRelay;
pub use sender::{BatchSender, DeliveryTarget, HttpSender};
