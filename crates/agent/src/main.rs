// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! pwa: the piecework build agent.
//!
//! Loads configuration from `PW_*` environment variables, connects to
//! the control plane, and runs jobs until stopped by the control plane
//! or a host signal.

use pw_agent::{AgentLoop, Config, Metrics, ShutdownSignals};
use pw_api::HttpControlPlane;
use pw_core::SystemClock;
use pw_verify::KeySet;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum AgentError {
    #[error(transparent)]
    Config(#[from] pw_agent::ConfigError),

    #[error("failed to load verification keys: {0}")]
    Keys(#[from] pw_verify::KeySetError),

    #[error("failed to build control-plane client: {0}")]
    Client(#[from] pw_api::ApiError),

    #[error("invalid allowlist pattern: {0}")]
    Allowlist(#[from] regex::Error),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => {
            tracing::info!("agent stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AgentError> {
    let config = Arc::new(Config::load_from_env()?);

    let keys = match &config.verification_key_file {
        Some(path) => {
            let keys = KeySet::from_file(path)?;
            tracing::info!(keys = keys.len(), "loaded verification keys");
            Some(Arc::new(keys))
        }
        None => None,
    };

    let client = Arc::new(HttpControlPlane::new(&config.endpoint, &config.token)?);
    let signals = ShutdownSignals::install()?;
    let metrics = Arc::new(Metrics::new());

    let agent = AgentLoop::new(client, config, keys, metrics, &signals, SystemClock)?;
    agent.run().await;
    Ok(())
}
