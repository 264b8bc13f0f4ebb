// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lightweight job metrics.
//!
//! Counters are kept in-process and every observation is emitted as a
//! structured tracing event under the `pw::metrics` target, so any
//! subscriber (or log shipper) can pick them up.

use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    jobs_succeeded: u64,
    jobs_failed: u64,
}

/// Concurrency-safe metrics scope shared by the agent loop and runners.
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<Counters>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time between a job becoming runnable and this agent starting it.
    pub fn record_queue_time(&self, job_id: &str, wait: Duration) {
        tracing::info!(
            target: "pw::metrics",
            job_id,
            queue_ms = wait.as_millis() as u64,
            "job queue time"
        );
    }

    pub fn record_job_finished(&self, job_id: &str, duration: Duration, success: bool) {
        {
            let mut counters = self.counters.lock();
            if success {
                counters.jobs_succeeded += 1;
            } else {
                counters.jobs_failed += 1;
            }
        }
        tracing::info!(
            target: "pw::metrics",
            job_id,
            duration_ms = duration.as_millis() as u64,
            success,
            "job finished"
        );
    }

    pub fn jobs_succeeded(&self) -> u64 {
        self.counters.lock().jobs_succeeded
    }

    pub fn jobs_failed(&self) -> u64 {
        self.counters.lock().jobs_failed
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
