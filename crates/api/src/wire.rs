// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire DTOs for the control-plane protocol.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Response to the long-poll ping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<pw_core::Job>,
}

/// What the agent loop should do with a ping response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingAction {
    Idle,
    Job,
    Stop,
}

impl PingResponse {
    pub fn action(&self) -> PingAction {
        match self.action.as_deref() {
            Some("stop") | Some("disconnect") => PingAction::Stop,
            _ if self.job.is_some() => PingAction::Job,
            _ => PingAction::Idle,
        }
    }
}

/// Body of `POST /v3/jobs/{id}/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub started_at: String,
}

/// Body of `POST /v3/jobs/{id}/header_times`. Keys are the decimal byte
/// offsets of section markers in the job log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderTimesRequest {
    pub header_times: BTreeMap<String, String>,
}

/// Response of `GET /v3/jobs/{id}`, polled for cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStateResponse {
    pub state: String,
}

/// Body of `POST /v3/jobs/{id}/finish`: the terminal job report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishRequest {
    pub finished_at: String,
    /// Stringified exit status; `"-1"` is the did-not-run sentinel.
    pub exit_status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_reason: Option<String>,
    pub chunks_failed_count: usize,
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
