// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job, step, and exit-report domain records.
//!
//! A [`Job`] is the immutable unit of work the control plane dispatches to
//! an agent. The embedded [`Step`] is the signed portion: the pipeline
//! template the job was derived from. Both deserialize directly from the
//! control-plane envelope.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default per-chunk byte limit when the envelope does not carry one.
pub const DEFAULT_CHUNK_BYTES: usize = 100 * 1024;

/// One unit of work dispatched by the control plane.
///
/// Immutable for its lifetime on the agent: created by the control plane,
/// surrendered on accept, destroyed after the terminal report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Job-scoped API token. Replaces the agent token for every call made
    /// against this job once the job has been accepted.
    #[serde(default)]
    pub access_token: String,
    /// The command line the executor will run.
    #[serde(default)]
    pub command: String,
    /// Merged environment the executor subprocess will see.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// The signed pipeline step this job was derived from.
    #[serde(default)]
    pub step: Step,
    /// Per-chunk byte limit for log uploads.
    #[serde(default = "default_chunk_bytes")]
    pub chunks_max_size_bytes: usize,
    /// Per-job override of the log processing interval, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_stream_interval_seconds: Option<f64>,
    /// The matrix selection this job runs, if the step declares a matrix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix_permutation: Option<HashMap<String, String>>,
    /// When the job became runnable. Feeds the queue-time metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runnable_at: Option<String>,
}

fn default_chunk_bytes() -> usize {
    DEFAULT_CHUNK_BYTES
}

impl Default for Job {
    fn default() -> Self {
        Self {
            id: String::new(),
            access_token: String::new(),
            command: String::new(),
            env: HashMap::new(),
            step: Step::default(),
            chunks_max_size_bytes: DEFAULT_CHUNK_BYTES,
            log_stream_interval_seconds: None,
            matrix_permutation: None,
            runnable_at: None,
        }
    }
}

/// The pipeline-declared template a job is derived from; the unit of
/// signing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub command: String,
    /// Ordered plugin sequence, kept as raw JSON: plugin sources are
    /// arbitrary objects and only their canonical form matters here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<serde_json::Value>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Matrix setup: dimension name to its declared values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<HashMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

/// A JWS-style detached signature over a declared set of step fields.
///
/// The signed-field list is self-describing: verification re-derives the
/// payload from the names listed here, in order. An absent or unknown
/// algorithm, or an empty field list, always fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub algorithm: String,
    /// Key id selecting the verification key (JWS `kid`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    pub signed_fields: Vec<String>,
    /// Base64 signature bytes.
    pub value: String,
}

/// Why a job exited abnormally. Shared vocabulary with the control plane:
/// adding a variant is a breaking protocol change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalReason {
    AgentRefused,
    AgentStop,
    Cancel,
    SignatureRejected,
    ProcessRunError,
}

impl SignalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalReason::AgentRefused => "agent_refused",
            SignalReason::AgentStop => "agent_stop",
            SignalReason::Cancel => "cancel",
            SignalReason::SignatureRejected => "signature_rejected",
            SignalReason::ProcessRunError => "process_run_error",
        }
    }
}

impl std::fmt::Display for SignalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The control plane flipped the job to `canceling`.
    JobState,
    /// The agent itself is stopping (host signal escalation).
    AgentStopping,
}

/// Write-once holder for the signal reason. The first assignment wins;
/// later assignments are ignored, so attribution order in the runner is
/// the precedence order.
#[derive(Debug, Default)]
pub struct ReasonSlot {
    inner: Mutex<Option<SignalReason>>,
}

impl ReasonSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reason` if no reason has been stored yet. Returns whether
    /// this call stored it.
    pub fn set(&self, reason: SignalReason) -> bool {
        let mut slot = self.inner.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(reason);
        true
    }

    pub fn get(&self) -> Option<SignalReason> {
        *self.inner.lock()
    }
}

/// Exit status sentinel for jobs that never ran.
pub const EXIT_STATUS_NOT_RUN: i32 = -1;

/// Terminal state of the executor subprocess, written once after reap (or
/// refusal) and consumed by the finish report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    pub status: i32,
    /// Name of the signal that terminated the process, if any.
    pub signal: Option<String>,
    pub signal_reason: Option<SignalReason>,
}

impl ProcessExit {
    /// Exit record for a job that was refused or failed before launch.
    pub fn not_run(reason: SignalReason) -> Self {
        Self { status: EXIT_STATUS_NOT_RUN, signal: None, signal_reason: Some(reason) }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// The wire form of the exit status (`"-1"` meaning did-not-run).
    pub fn status_string(&self) -> String {
        self.status.to_string()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
