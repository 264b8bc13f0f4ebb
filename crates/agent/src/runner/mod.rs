// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job runner: drives one job from receipt to terminal report.
//!
//! `run` verifies the step signature, checks the agent's allowlists,
//! consults the pre-bootstrap hook, launches the executor under the
//! supervisor, streams its output, and always ends by posting the
//! terminal report. `cancel` is the two-phase stop: interrupt, wait out
//! the grace period, terminate.
//!
//! Cancellation never aborts cleanup. The flush of remaining output and
//! the finish report run unconditionally after the executor is gone,
//! because a lost terminal report stalls the build on the control plane.

pub mod buffer;
pub mod header_times;
pub mod hooks;
pub mod streamer;
pub mod supervisor;

use crate::allowlist::Allowlist;
use crate::config::{Config, FailurePolicy};
use crate::env::build_executor_env;
use crate::metrics::Metrics;
use buffer::OutputBuffer;
use header_times::HeaderTimeStreamer;
use hooks::run_pre_bootstrap;
use parking_lot::Mutex;
use pw_api::wire::FinishRequest;
use pw_api::{ApiError, ControlPlane};
use pw_core::{
    epoch_ms_to_rfc3339, rfc3339_to_epoch_ms, CancelReason, Clock, Job, ProcessExit, ReasonSlot,
    Retrier, SignalReason, SystemClock, EXIT_STATUS_NOT_RUN,
};
use pw_verify::{verify_job, KeySet, Outcome};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use streamer::LogStreamer;
use supervisor::{ExitState, Supervisor};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Inner ticks between outer re-jitters of the log scheduler.
const INNER_TICKS: u32 = 32;

/// Retry budget for one chunk upload.
const CHUNK_RETRY_ATTEMPTS: u32 = 5;
const CHUNK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Job states that mean the control plane wants the job stopped.
const CANCELING_STATES: [&str; 2] = ["canceling", "canceled"];

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("control plane call failed: {0}")]
    Api(#[from] ApiError),
}

/// Runs one job to completion. Shared behind `Arc` so the cancellation
/// poller and the agent loop can request cancellation concurrently with
/// `run`.
pub struct JobRunner<C: Clock = SystemClock> {
    job: Job,
    client: Arc<dyn ControlPlane>,
    config: Arc<Config>,
    keys: Option<Arc<KeySet>>,
    allowlist: Allowlist,
    metrics: Arc<Metrics>,
    clock: C,
    buffer: Arc<OutputBuffer>,
    supervisor: Arc<Supervisor>,
    scratch_dir: PathBuf,
    reason: ReasonSlot,
    cancel_requested: Mutex<bool>,
    agent_stopping: AtomicBool,
}

impl<C: Clock> JobRunner<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job: Job,
        client: Arc<dyn ControlPlane>,
        config: Arc<Config>,
        keys: Option<Arc<KeySet>>,
        allowlist: Allowlist,
        metrics: Arc<Metrics>,
        clock: C,
    ) -> Arc<Self> {
        let buffer = Arc::new(OutputBuffer::new());
        let supervisor = Arc::new(Supervisor::new(buffer.clone(), &config.interrupt_signal));
        let scratch_dir = std::env::temp_dir().join(format!("pw-job-{}", job.id));
        Arc::new(Self {
            job,
            client,
            config,
            keys,
            allowlist,
            metrics,
            clock,
            buffer,
            supervisor,
            scratch_dir,
            reason: ReasonSlot::new(),
            cancel_requested: Mutex::new(false),
            agent_stopping: AtomicBool::new(false),
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Drive the job to its terminal report. The finish call is last on
    /// purpose: it is the point at which the control plane may hand this
    /// agent another job.
    pub async fn run(self: Arc<Self>) -> Result<(), RunnerError> {
        let run_started = self.clock.now();
        tracing::info!(job_id = %self.job.id, command = %self.job.command, "starting job");
        let started_at = epoch_ms_to_rfc3339(self.clock.epoch_ms());
        self.client.start_job(&self.job.id, &started_at).await?;
        self.record_queue_time();

        let header_times =
            Arc::new(HeaderTimeStreamer::new(self.client.clone(), &self.job.id, self.clock.clone()));
        let streamer = Arc::new(LogStreamer::new(
            self.client.clone(),
            &self.job.id,
            self.job.chunks_max_size_bytes,
            Retrier::new(CHUNK_RETRY_ATTEMPTS, CHUNK_RETRY_DELAY),
        ));

        let exit = self.execute(streamer.clone(), header_times.clone()).await;

        // Final drain: everything the scheduler has not picked up yet.
        let (offset, bytes) = self.buffer.read_and_truncate();
        header_times.scan(offset, &bytes);
        if let Err(e) = streamer.process(offset, bytes) {
            tracing::warn!(job_id = %self.job.id, error = %e, "final log flush failed");
        }
        streamer.stop().await;
        header_times.stop().await;
        self.remove_scratch_dir();

        let duration = self.clock.now() - run_started;
        self.metrics.record_job_finished(&self.job.id, duration, exit.success());

        let report = FinishRequest {
            finished_at: epoch_ms_to_rfc3339(self.clock.epoch_ms()),
            exit_status: exit.status_string(),
            signal: exit.signal.clone(),
            signal_reason: exit.signal_reason.map(|r| r.as_str().to_string()),
            chunks_failed_count: streamer.failed_chunks(),
        };
        tracing::info!(
            job_id = %self.job.id,
            exit_status = %report.exit_status,
            signal = ?report.signal,
            signal_reason = ?report.signal_reason,
            chunks_failed = report.chunks_failed_count,
            "finishing job"
        );
        self.client.finish_job(&self.job.id, &report).await?;
        Ok(())
    }

    /// Everything between the start report and the final flush.
    async fn execute(
        self: &Arc<Self>,
        streamer: Arc<LogStreamer>,
        header_times: Arc<HeaderTimeStreamer<C>>,
    ) -> ProcessExit {
        match verify_job(&self.job, self.keys.as_deref()) {
            Ok(Outcome::Verified) => {
                tracing::info!(job_id = %self.job.id, "job signature verified");
                self.log_line("~~~ ✅ Job signature verified");
            }
            Ok(Outcome::Unsigned) => {}
            Err(err) => match self.config.verification_failure_policy {
                FailurePolicy::Block => {
                    tracing::error!(job_id = %self.job.id, error = %err, "refusing job: verification failed");
                    self.log_line("+++ ⛔ Job signature rejected");
                    self.log_line(&err.to_string());
                    return self.refuse(SignalReason::SignatureRejected);
                }
                FailurePolicy::Warn => {
                    tracing::warn!(job_id = %self.job.id, error = %err, "job verification failed; policy is warn");
                    self.log_line("+++ ⚠️ Job signature could not be verified");
                    self.log_line(&err.to_string());
                }
            },
        }

        if let Err(err) = self.allowlist.check_job(&self.job) {
            tracing::error!(job_id = %self.job.id, error = %err, "refusing job: allowlist");
            self.log_line("+++ ⛔ Job refused by this agent");
            self.log_line(&err.to_string());
            return self.refuse(SignalReason::AgentRefused);
        }

        if let Err(e) = std::fs::create_dir_all(&self.scratch_dir) {
            tracing::error!(job_id = %self.job.id, error = %e, "failed to create scratch directory");
            return self.refuse(SignalReason::ProcessRunError);
        }
        let env = build_executor_env(&self.job, &self.config, &self.scratch_dir);

        if let Err(err) = run_pre_bootstrap(&self.config.hooks_path, &env).await {
            tracing::error!(job_id = %self.job.id, error = %err, "refusing job: pre-bootstrap hook");
            self.log_line("+++ ⛔ Job refused by pre-bootstrap hook");
            self.log_line(&err.to_string());
            return self.refuse(SignalReason::AgentRefused);
        }

        if let Err(e) = std::fs::create_dir_all(&self.config.build_path) {
            tracing::error!(job_id = %self.job.id, error = %e, "failed to create build directory");
            return self.refuse(SignalReason::ProcessRunError);
        }
        if let Err(err) = self
            .supervisor
            .start(&self.config.bootstrap_command, &env, &self.config.build_path)
            .await
        {
            tracing::error!(job_id = %self.job.id, error = %err, "job executor failed to launch");
            self.log_line("+++ ⛔ Job executor failed to launch");
            self.log_line(&err.to_string());
            // done has already fired; fall through so attribution sees
            // the launch failure.
        }

        let done = self.supervisor.done();
        let log_task = tokio::spawn(log_loop(
            self.buffer.clone(),
            streamer,
            header_times,
            done.clone(),
            self.chunk_interval(),
        ));
        let poller = tokio::spawn(self.clone().poll_cancellation(done.clone()));

        done.cancelled().await;
        let _ = log_task.await;
        let _ = poller.await;

        let status =
            self.supervisor.wait_status().unwrap_or(ExitState { status: -1, signal: None });
        let fallback = (!self.supervisor.launched()).then_some(SignalReason::ProcessRunError);
        let reason = self.attribute(fallback);
        ProcessExit { status: status.status, signal: status.signal, signal_reason: reason }
    }

    /// Idempotent two-phase stop: interrupt, wait out the grace period,
    /// terminate. Safe to call concurrently with `run`.
    pub async fn cancel(&self, cancel_reason: CancelReason) {
        {
            let mut requested = self.cancel_requested.lock();
            if *requested {
                return;
            }
            *requested = true;
        }
        if matches!(cancel_reason, CancelReason::AgentStopping) {
            self.agent_stopping.store(true, Ordering::SeqCst);
        }
        tracing::info!(job_id = %self.job.id, reason = ?cancel_reason, "cancelling job");
        self.log_line("~~~ Cancellation requested, interrupting job executor");

        self.supervisor.interrupt();
        let done = self.supervisor.done();
        if tokio::time::timeout(self.config.signal_grace_period, done.cancelled()).await.is_err() {
            tracing::warn!(job_id = %self.job.id, "grace period expired; terminating job executor");
            self.supervisor.terminate();
        }
    }

    async fn poll_cancellation(self: Arc<Self>, done: CancellationToken) {
        loop {
            tokio::select! {
                _ = done.cancelled() => return,
                _ = tokio::time::sleep(self.config.job_state_poll_interval) => {}
            }
            match self.client.job_state(&self.job.id).await {
                Ok(state) if CANCELING_STATES.contains(&state.as_str()) => {
                    tracing::info!(job_id = %self.job.id, state = %state, "control plane requested cancellation");
                    self.cancel(CancelReason::JobState).await;
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(job_id = %self.job.id, error = %e, "job state poll failed");
                }
            }
        }
    }

    /// Resolve the signal reason. Flags take precedence over the
    /// caller's fallback, and the slot keeps the first assignment.
    fn attribute(&self, fallback: Option<SignalReason>) -> Option<SignalReason> {
        if self.agent_stopping.load(Ordering::SeqCst) {
            self.reason.set(SignalReason::AgentStop);
        } else if *self.cancel_requested.lock() {
            self.reason.set(SignalReason::Cancel);
        } else if let Some(fallback) = fallback {
            self.reason.set(fallback);
        }
        self.reason.get()
    }

    fn refuse(&self, reason: SignalReason) -> ProcessExit {
        let reason = self.attribute(Some(reason));
        ProcessExit { status: EXIT_STATUS_NOT_RUN, signal: None, signal_reason: reason }
    }

    /// Echo a refusal or status line into the job log.
    fn log_line(&self, line: &str) {
        let _ = self.buffer.write(format!("{line}\n").as_bytes());
    }

    fn chunk_interval(&self) -> Duration {
        self.job
            .log_stream_interval_seconds
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.config.chunk_interval)
    }

    fn record_queue_time(&self) {
        let Some(runnable_at) = self.job.runnable_at.as_deref() else {
            return;
        };
        let Some(runnable_ms) = rfc3339_to_epoch_ms(runnable_at) else {
            return;
        };
        let now_ms = self.clock.epoch_ms();
        if now_ms > runnable_ms {
            self.metrics
                .record_queue_time(&self.job.id, Duration::from_millis(now_ms - runnable_ms));
        }
    }

    fn remove_scratch_dir(&self) {
        if self.scratch_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.scratch_dir) {
                tracing::warn!(job_id = %self.job.id, error = %e, "failed to remove scratch directory");
            }
        }
    }
}

/// The two-level jittered log scheduler.
///
/// A plain fixed tick slowly synchronises a fleet of agents into upload
/// stampedes; wide per-tick jitter hurts tail latency in the UI. So the
/// inner ticker runs a fixed number of plain intervals, and only the
/// outer loop re-jitters by a uniform fraction of one interval.
async fn log_loop<C: Clock>(
    buffer: Arc<OutputBuffer>,
    streamer: Arc<LogStreamer>,
    header_times: Arc<HeaderTimeStreamer<C>>,
    done: CancellationToken,
    interval: Duration,
) {
    use rand::Rng;
    'outer: loop {
        let jitter = interval.mul_f64(rand::rng().random_range(0.0..1.0));
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::time::sleep(jitter) => {}
        }
        for _ in 0..INNER_TICKS {
            tokio::select! {
                _ = done.cancelled() => break 'outer,
                _ = tokio::time::sleep(interval) => {}
            }
            let (offset, bytes) = buffer.read_and_truncate();
            header_times.scan(offset, &bytes);
            if let Err(e) = streamer.process(offset, bytes) {
                tracing::warn!(error = %e, "log streaming backpressure; closing output buffer");
                buffer.close();
            }
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
