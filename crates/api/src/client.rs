// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed control-plane client with unified retry.
//!
//! [`ControlPlane`] is the seam the agent loop and job runner depend on.
//! [`HttpControlPlane`] implements it over HTTPS: every call except the
//! long-poll ping runs through the shared [`Retrier`], and the terminal
//! `finish_job` report retries without an attempt budget, because losing
//! it would stall the build on the control plane forever.

use crate::error::ApiError;
use crate::wire::{FinishRequest, HeaderTimesRequest, JobStateResponse, PingResponse, StartRequest};
use async_trait::async_trait;
use pw_core::{Job, Retrier};
use reqwest::header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Per-attempt budget for ordinary calls.
const DEFAULT_ATTEMPTS: u32 = 7;
/// First retry delay.
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
/// Ceiling for the unbounded finish-report retry.
const FINISH_MAX_DELAY: Duration = Duration::from_secs(30);
/// Per-attempt request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Typed RPC surface of the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Long-poll for work. Not retried here: the agent loop owns the
    /// idle backoff.
    async fn ping(&self) -> Result<PingResponse, ApiError>;

    async fn accept_job(&self, id: &str) -> Result<Job, ApiError>;

    async fn start_job(&self, id: &str, started_at: &str) -> Result<(), ApiError>;

    /// Upload one gzip-compressed log chunk under its sequence number.
    async fn upload_chunk(&self, id: &str, sequence: u64, payload: &[u8]) -> Result<(), ApiError>;

    async fn upload_header_times(
        &self,
        id: &str,
        times: &HashMap<u64, String>,
    ) -> Result<(), ApiError>;

    /// Current job state, polled for cancellation.
    async fn job_state(&self, id: &str) -> Result<String, ApiError>;

    /// Post the terminal report. Implementations retry this until it
    /// lands.
    async fn finish_job(&self, id: &str, report: &FinishRequest) -> Result<(), ApiError>;

    /// A client identical to this one but authenticating with `token`.
    /// Used to scope calls to a job once its access token is known.
    fn with_token(&self, token: &str) -> Arc<dyn ControlPlane>;
}

/// HTTPS implementation of [`ControlPlane`].
#[derive(Clone)]
pub struct HttpControlPlane {
    http: reqwest::Client,
    base: Url,
    token: String,
    retrier: Retrier,
    finish_retrier: Retrier,
}

impl HttpControlPlane {
    pub fn new(endpoint: &str, token: &str) -> Result<Self, ApiError> {
        // A trailing slash keeps Url::join from eating the last path
        // segment of prefixed endpoints.
        let normalized =
            if endpoint.ends_with('/') { endpoint.to_string() } else { format!("{endpoint}/") };
        let base: Url = normalized.parse().map_err(|e| ApiError::Url(format!("{e}")))?;
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base,
            token: token.to_string(),
            retrier: Retrier::new(DEFAULT_ATTEMPTS, DEFAULT_INITIAL_DELAY),
            finish_retrier: Retrier::unlimited(DEFAULT_INITIAL_DELAY, FINISH_MAX_DELAY),
        })
    }

    pub fn with_retrier(mut self, retrier: Retrier) -> Self {
        self.retrier = retrier;
        self
    }

    pub fn with_finish_retrier(mut self, retrier: Retrier) -> Self {
        self.finish_retrier = retrier;
        self
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|e| ApiError::Url(format!("{e}")))
    }

    /// Send with auth attached; non-2xx responses become [`ApiError::Http`]
    /// with the body captured for the log.
    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let res = req.header(AUTHORIZATION, format!("Token {}", self.token)).send().await?;
        let status = res.status();
        if status.is_success() {
            Ok(res)
        } else {
            let body = res.text().await.unwrap_or_default();
            Err(ApiError::Http { status: status.as_u16(), body })
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn ping(&self) -> Result<PingResponse, ApiError> {
        let url = self.url("v3/ping")?;
        let res = self.send(self.http.get(url)).await?;
        Ok(res.json().await?)
    }

    async fn accept_job(&self, id: &str) -> Result<Job, ApiError> {
        let url = self.url(&format!("v3/accepts/{id}"))?;
        self.retrier
            .run(|_attempt| {
                let url = url.clone();
                async move {
                    let res = self.send(self.http.get(url)).await?;
                    Ok(res.json::<Job>().await?)
                }
            })
            .await
    }

    async fn start_job(&self, id: &str, started_at: &str) -> Result<(), ApiError> {
        let url = self.url(&format!("v3/jobs/{id}/start"))?;
        let body = StartRequest { started_at: started_at.to_string() };
        self.retrier
            .run(|_attempt| {
                let url = url.clone();
                let body = body.clone();
                async move {
                    self.send(self.http.post(url).json(&body)).await?;
                    Ok(())
                }
            })
            .await
    }

    /// Single-shot on purpose: chunk retry policy (and failed-chunk
    /// accounting) belongs to the log streamer's upload workers.
    async fn upload_chunk(&self, id: &str, sequence: u64, payload: &[u8]) -> Result<(), ApiError> {
        let url = self.url(&format!("v3/jobs/{id}/chunks"))?;
        self.send(
            self.http
                .post(url)
                .query(&[("sequence", sequence)])
                .header(CONTENT_ENCODING, "gzip")
                .header(CONTENT_TYPE, "text/plain")
                .body(payload.to_vec()),
        )
        .await?;
        Ok(())
    }

    async fn upload_header_times(
        &self,
        id: &str,
        times: &HashMap<u64, String>,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("v3/jobs/{id}/header_times"))?;
        let body = HeaderTimesRequest {
            header_times: times.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        };
        self.retrier
            .run(|_attempt| {
                let url = url.clone();
                let body = body.clone();
                async move {
                    self.send(self.http.post(url).json(&body)).await?;
                    Ok(())
                }
            })
            .await
    }

    async fn job_state(&self, id: &str) -> Result<String, ApiError> {
        let url = self.url(&format!("v3/jobs/{id}"))?;
        self.retrier
            .run(|_attempt| {
                let url = url.clone();
                async move {
                    let res = self.send(self.http.get(url)).await?;
                    let state: JobStateResponse = res.json().await?;
                    Ok(state.state)
                }
            })
            .await
    }

    async fn finish_job(&self, id: &str, report: &FinishRequest) -> Result<(), ApiError> {
        let url = self.url(&format!("v3/jobs/{id}/finish"))?;
        self.finish_retrier
            .run(|attempt| {
                let url = url.clone();
                let body = report.clone();
                async move {
                    if attempt > 1 {
                        tracing::info!(job_id = id, attempt, "re-posting terminal job report");
                    }
                    self.send(self.http.post(url).json(&body)).await?;
                    Ok(())
                }
            })
            .await
    }

    fn with_token(&self, token: &str) -> Arc<dyn ControlPlane> {
        let mut scoped = self.clone();
        scoped.token = token.to_string();
        Arc::new(scoped)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
