// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Unified retry policy for control-plane calls and chunk uploads.
//!
//! Every network call-site in the agent runs through one [`Retrier`]
//! parameterized by attempt budget, backoff curve, and the error's own
//! recoverability. Delays are exponential with equal jitter: a retry waits
//! between half the capped backoff and the full capped backoff, so a fleet
//! of agents retrying the same outage spreads out instead of stampeding.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Classifies an error as worth retrying or terminal.
pub trait Recoverable {
    fn is_recoverable(&self) -> bool;
}

/// Retry policy: attempt budget, backoff curve, jitter.
#[derive(Debug, Clone)]
pub struct Retrier {
    max_attempts: Option<u32>,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Retrier {
    /// Bounded retrier: up to `max_attempts` attempts, doubling delays
    /// from `initial_delay`, capped at 60 seconds.
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self { max_attempts: Some(max_attempts), initial_delay, max_delay: Duration::from_secs(60), jitter: true }
    }

    /// Unbounded retrier for calls that must eventually succeed (the
    /// terminal job report). Delays double up to `max_delay` and stay
    /// there.
    pub fn unlimited(initial_delay: Duration, max_delay: Duration) -> Self {
        Self { max_attempts: None, initial_delay, max_delay, jitter: true }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Disable jitter. Used by tests that assert exact delays.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Delay before the retry following attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let doubling = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        let capped = self.initial_delay.saturating_mul(doubling).min(self.max_delay);
        if self.jitter && !capped.is_zero() {
            capped.mul_f64(rand::rng().random_range(0.5..=1.0))
        } else {
            capped
        }
    }

    /// Drive `op` until it succeeds, returns a non-recoverable error, or
    /// the attempt budget runs out. `op` receives the 1-based attempt
    /// number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Recoverable + std::fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_recoverable() => return Err(err),
                Err(err) => {
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            return Err(err);
                        }
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after recoverable error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
