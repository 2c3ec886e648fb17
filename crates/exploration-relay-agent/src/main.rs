// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod journal;

use std::env;
use tokio::{
    fs::File,
    io::{self, AsyncBufReadExt, AsyncRead, BufReader},
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use exploration_relay::{ExplorationRelay, PipelineConfig};
use journal::{parse_line, HostContext};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("EXPLORATION_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,reqwest=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Error loading exploration configuration: {e}. Shutting down.");
            return;
        }
    };
    // Long enough for a partial batch to come due and for its request to finish.
    let drain_limit = config.flush_interval + config.request_timeout;

    let relay = match ExplorationRelay::new(config) {
        Ok(relay) => relay,
        Err(e) => {
            error!("Error creating exploration relay: {e}. Shutting down.");
            return;
        }
    };
    relay.start().await;

    let source: Box<dyn AsyncRead + Unpin + Send> = match env::var("EXPLORATION_JOURNAL_PATH") {
        Ok(path) => match File::open(&path).await {
            Ok(file) => {
                info!("Reading journal from {path}");
                Box::new(file)
            }
            Err(e) => {
                error!("Unable to open journal {path}: {e}. Shutting down.");
                return;
            }
        },
        Err(_) => {
            info!("Reading journal from stdin");
            Box::new(io::stdin())
        }
    };

    tokio::select! {
        _ = read_journal(&relay, source) => {
            debug!("Journal input exhausted");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    if relay.pending() > 0 {
        debug!(
            "Waiting up to {}s for {} pending exploration records",
            drain_limit.as_secs(),
            relay.pending()
        );
    }
    if !relay.drain(drain_limit).await {
        warn!(
            "Shutting down with {} exploration records undelivered",
            relay.pending()
        );
    }
    relay.stop().await;
}

async fn read_journal(relay: &ExplorationRelay, source: Box<dyn AsyncRead + Unpin + Send>) {
    let mut lines = BufReader::new(source).lines();
    let mut host = HostContext::new();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(entry) = parse_line(&line) else {
                    continue;
                };
                host.observe(&entry);
                if let Some(context) = host.journal_context() {
                    relay.journal_entry(&context, &entry);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Error reading journal: {e}");
                break;
            }
        }
    }
}
