// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The agent's outer loop: long-poll for work, run one job at a time.
//!
//! The loop pings until the control plane hands over a job or says stop.
//! A graceful shutdown request lets the current job finish and then
//! breaks the loop; a forced request cancels the current job with
//! agent-stop attribution.

use crate::allowlist::Allowlist;
use crate::config::Config;
use crate::metrics::Metrics;
use crate::runner::JobRunner;
use crate::signals::ShutdownSignals;
use pw_api::{ControlPlane, PingAction};
use pw_core::{CancelReason, Clock, Job, SystemClock};
use pw_verify::KeySet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct AgentLoop<C: Clock = SystemClock> {
    client: Arc<dyn ControlPlane>,
    config: Arc<Config>,
    keys: Option<Arc<KeySet>>,
    allowlist: Allowlist,
    metrics: Arc<Metrics>,
    clock: C,
    graceful: CancellationToken,
    forced: CancellationToken,
}

impl<C: Clock> AgentLoop<C> {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        config: Arc<Config>,
        keys: Option<Arc<KeySet>>,
        metrics: Arc<Metrics>,
        signals: &ShutdownSignals,
        clock: C,
    ) -> Result<Self, regex::Error> {
        let allowlist = Allowlist::new(
            &config.allowed_repositories,
            &config.allowed_env_names,
            &config.allowed_plugins,
        )?;
        Ok(Self {
            client,
            config,
            keys,
            allowlist,
            metrics,
            clock,
            graceful: signals.graceful.clone(),
            forced: signals.forced.clone(),
        })
    }

    /// Ping until told to stop. Returns once the agent should exit.
    pub async fn run(&self) {
        tracing::info!("agent ready, waiting for work");
        loop {
            if self.graceful.is_cancelled() {
                tracing::info!("graceful stop requested; leaving the ping loop");
                return;
            }

            let ping = tokio::select! {
                ping = self.client.ping() => ping,
                _ = self.graceful.cancelled() => continue,
            };

            match ping {
                Err(e) => {
                    tracing::warn!(error = %e, "ping failed");
                    self.idle_sleep().await;
                }
                Ok(response) => match response.action() {
                    PingAction::Stop => {
                        tracing::info!("control plane asked this agent to stop");
                        return;
                    }
                    PingAction::Idle => self.idle_sleep().await,
                    PingAction::Job => {
                        let Some(job) = response.job else {
                            continue;
                        };
                        self.accept_and_run(job).await;
                    }
                },
            }
        }
    }

    async fn accept_and_run(&self, offered: Job) {
        let job = match self.client.accept_job(&offered.id).await {
            Ok(job) => job,
            Err(e) => {
                tracing::error!(job_id = %offered.id, error = %e, "failed to accept job");
                self.idle_sleep().await;
                return;
            }
        };

        // The job token replaces the agent token for this job's calls.
        let client = if job.access_token.is_empty() {
            self.client.clone()
        } else {
            self.client.with_token(&job.access_token)
        };

        let runner = JobRunner::new(
            job,
            client,
            self.config.clone(),
            self.keys.clone(),
            self.allowlist.clone(),
            self.metrics.clone(),
            self.clock.clone(),
        );

        let run = runner.clone().run();
        tokio::pin!(run);
        let mut forced_handled = false;
        loop {
            tokio::select! {
                result = &mut run => {
                    if let Err(e) = result {
                        tracing::error!(job_id = %runner.job().id, error = %e, "job runner failed");
                    }
                    return;
                }
                _ = self.forced.cancelled(), if !forced_handled => {
                    forced_handled = true;
                    runner.cancel(CancelReason::AgentStopping).await;
                }
            }
        }
    }

    async fn idle_sleep(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.ping_interval) => {}
            _ = self.graceful.cancelled() => {}
        }
    }
}

#[cfg(test)]
#[path = "agent_loop_tests.rs"]
mod tests;
