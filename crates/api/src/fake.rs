// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recording in-memory control plane for tests.
//!
//! Records every call, serves scripted ping responses, and can inject
//! chunk-upload failures. Token-scoped clones share the same state so a
//! test can hand the fake to the agent and assert on everything the
//! agent did.

use crate::client::ControlPlane;
use crate::error::ApiError;
use crate::wire::{FinishRequest, PingResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use pw_core::Job;
use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::sync::Arc;

/// One recorded chunk upload, with the payload already decompressed.
#[derive(Debug, Clone)]
pub struct UploadedChunk {
    pub job_id: String,
    pub sequence: u64,
    pub data: Vec<u8>,
}

/// Everything the fake has seen and everything it is scripted to do.
#[derive(Default)]
pub struct FakeState {
    /// Scripted ping responses, served front-first; empty means idle.
    pub pings: VecDeque<PingResponse>,
    /// Envelope served by `accept_job`.
    pub job_envelope: Option<Job>,
    /// Job state served to the cancellation poller.
    pub job_state: String,

    pub accepted: Vec<String>,
    pub tokens: Vec<String>,
    pub started: Vec<(String, String)>,
    pub chunks: Vec<UploadedChunk>,
    pub header_times: Vec<(String, HashMap<u64, String>)>,
    pub finishes: Vec<(String, FinishRequest)>,

    /// Fail this many chunk uploads with a 500 before accepting them.
    pub chunk_failures_remaining: u32,
    /// Sequences that always fail with a 422 (terminal).
    pub reject_sequences: Vec<u64>,
    /// Fail every header-times upload with a 500.
    pub fail_header_times: bool,
}

/// In-memory [`ControlPlane`] that records calls against shared state.
#[derive(Clone, Default)]
pub struct FakeControlPlane {
    state: Arc<Mutex<FakeState>>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.state.lock().job_state = "running".to_string();
        fake
    }

    /// Fake that serves `job` once via ping and accept.
    pub fn with_job(job: Job) -> Self {
        let fake = Self::new();
        {
            let mut state = fake.state.lock();
            state.pings.push_back(PingResponse {
                action: Some("job".into()),
                job: Some(job.clone()),
            });
            state.job_envelope = Some(job);
        }
        fake
    }

    pub fn state(&self) -> Arc<Mutex<FakeState>> {
        self.state.clone()
    }

    pub fn set_job_state(&self, state: &str) {
        self.state.lock().job_state = state.to_string();
    }

    /// The job log as the control plane assembled it: chunk payloads in
    /// sequence order.
    pub fn log_text(&self) -> String {
        let state = self.state.lock();
        let mut chunks: Vec<&UploadedChunk> = state.chunks.iter().collect();
        chunks.sort_by_key(|c| c.sequence);
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend_from_slice(&chunk.data);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Uploaded sequence numbers in upload order.
    pub fn sequences(&self) -> Vec<u64> {
        self.state.lock().chunks.iter().map(|c| c.sequence).collect()
    }

    pub fn finish_report(&self, job_id: &str) -> Option<FinishRequest> {
        self.state
            .lock()
            .finishes
            .iter()
            .find(|(id, _)| id == job_id)
            .map(|(_, report)| report.clone())
    }
}

fn gunzip(payload: &[u8]) -> Result<Vec<u8>, ApiError> {
    let mut decoder = flate2::read::GzDecoder::new(payload);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|_| ApiError::Http {
        status: 422,
        body: "chunk payload is not valid gzip".to_string(),
    })?;
    Ok(out)
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn ping(&self) -> Result<PingResponse, ApiError> {
        Ok(self.state.lock().pings.pop_front().unwrap_or_default())
    }

    async fn accept_job(&self, id: &str) -> Result<Job, ApiError> {
        let mut state = self.state.lock();
        state.accepted.push(id.to_string());
        state.job_envelope.clone().ok_or(ApiError::Http {
            status: 404,
            body: "no job to accept".to_string(),
        })
    }

    async fn start_job(&self, id: &str, started_at: &str) -> Result<(), ApiError> {
        self.state.lock().started.push((id.to_string(), started_at.to_string()));
        Ok(())
    }

    async fn upload_chunk(&self, id: &str, sequence: u64, payload: &[u8]) -> Result<(), ApiError> {
        let data = gunzip(payload)?;
        let mut state = self.state.lock();
        if state.reject_sequences.contains(&sequence) {
            return Err(ApiError::Http { status: 422, body: "rejected".to_string() });
        }
        if state.chunk_failures_remaining > 0 {
            state.chunk_failures_remaining -= 1;
            return Err(ApiError::Http { status: 500, body: "try again".to_string() });
        }
        state.chunks.push(UploadedChunk { job_id: id.to_string(), sequence, data });
        Ok(())
    }

    async fn upload_header_times(
        &self,
        id: &str,
        times: &HashMap<u64, String>,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        if state.fail_header_times {
            return Err(ApiError::Http { status: 500, body: "unavailable".to_string() });
        }
        state.header_times.push((id.to_string(), times.clone()));
        Ok(())
    }

    async fn job_state(&self, _id: &str) -> Result<String, ApiError> {
        Ok(self.state.lock().job_state.clone())
    }

    async fn finish_job(&self, id: &str, report: &FinishRequest) -> Result<(), ApiError> {
        self.state.lock().finishes.push((id.to_string(), report.clone()));
        Ok(())
    }

    fn with_token(&self, token: &str) -> Arc<dyn ControlPlane> {
        self.state.lock().tokens.push(token.to_string());
        Arc::new(self.clone())
    }
}
