// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host signal handling.
//!
//! One long-lived watcher task counts stop signals. The first
//! SIGINT/SIGTERM/SIGQUIT asks for a graceful stop (finish the current
//! job, stop pinging); the second forces cancellation of the current
//! job. SIGHUP is consumed and ignored. After the second stop signal
//! the watcher exits, so a third falls through to the default handler
//! and kills the process outright.

use tokio_util::sync::CancellationToken;

/// Shutdown intent derived from host signals.
#[derive(Debug, Clone)]
pub struct ShutdownSignals {
    /// First stop signal: let the current job finish, then exit.
    pub graceful: CancellationToken,
    /// Second stop signal: cancel the current job now.
    pub forced: CancellationToken,
}

impl ShutdownSignals {
    /// Tokens without an installed watcher, for tests and embedding.
    pub fn manual() -> Self {
        Self { graceful: CancellationToken::new(), forced: CancellationToken::new() }
    }

    /// Install the watcher task on the current runtime.
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let signals = Self::manual();
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut hangup = signal(SignalKind::hangup())?;

        let graceful = signals.graceful.clone();
        let forced = signals.forced.clone();
        tokio::spawn(async move {
            let mut stop_signals_seen = 0u32;
            loop {
                tokio::select! {
                    _ = interrupt.recv() => {}
                    _ = terminate.recv() => {}
                    _ = quit.recv() => {}
                    _ = hangup.recv() => {
                        tracing::debug!("ignoring SIGHUP");
                        continue;
                    }
                }
                stop_signals_seen += 1;
                match stop_signals_seen {
                    1 => {
                        tracing::info!("stop signal received; finishing current job before exit");
                        graceful.cancel();
                    }
                    _ => {
                        tracing::warn!("second stop signal received; cancelling current job");
                        forced.cancel();
                        return;
                    }
                }
            }
        });
        Ok(signals)
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        let signals = Self::manual();
        let graceful = signals.graceful.clone();
        let forced = signals.forced.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                graceful.cancel();
            }
            if tokio::signal::ctrl_c().await.is_ok() {
                forced.cancel();
            }
        });
        Ok(signals)
    }
}
