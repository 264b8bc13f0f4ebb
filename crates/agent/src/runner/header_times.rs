// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band section-header timestamps.
//!
//! The build UI groups log output into sections introduced by marker
//! lines (`--- `, `+++ `, `~~~ `). The streamer watches the byte stream
//! for markers at line starts, stamps each with wall time keyed by its
//! byte offset, and posts the accumulated pairs in the background.
//! Upload failures are logged and retried on the next flush; they never
//! fail the job.

use parking_lot::Mutex;
use pw_api::ControlPlane;
use pw_core::{epoch_ms_to_rfc3339, Clock, SystemClock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often accumulated header times are posted.
const POST_INTERVAL: Duration = Duration::from_secs(1);

/// A marker is three of the same sigil followed by a space.
const MARKERS: [&[u8; 4]; 3] = [b"--- ", b"+++ ", b"~~~ "];
const MARKER_LEN: usize = 4;

struct ScanState {
    /// Byte offset where the current line started.
    line_offset: u64,
    /// First bytes of the current line, up to marker length.
    prefix: Vec<u8>,
    /// Whether the current line already produced a marker hit.
    matched: bool,
}

/// Detects section markers and posts their timestamps.
pub struct HeaderTimeStreamer<C: Clock = SystemClock> {
    client: Arc<dyn ControlPlane>,
    job_id: String,
    clock: C,
    scan: Mutex<ScanState>,
    pending: Arc<Mutex<HashMap<u64, String>>>,
    stop: CancellationToken,
    uploader: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock> HeaderTimeStreamer<C> {
    pub fn new(client: Arc<dyn ControlPlane>, job_id: &str, clock: C) -> Self {
        let pending: Arc<Mutex<HashMap<u64, String>>> = Arc::new(Mutex::new(HashMap::new()));
        let stop = CancellationToken::new();
        let uploader = tokio::spawn(upload_loop(
            client.clone(),
            job_id.to_string(),
            pending.clone(),
            stop.clone(),
        ));
        Self {
            client,
            job_id: job_id.to_string(),
            clock,
            scan: Mutex::new(ScanState { line_offset: 0, prefix: Vec::new(), matched: false }),
            pending,
            stop,
            uploader: Mutex::new(Some(uploader)),
        }
    }

    /// Scan a drained slice of the output stream. `base_offset` is the
    /// logical offset of `bytes[0]`; slices must arrive in stream order
    /// but may split lines (and markers) anywhere.
    pub fn scan(&self, base_offset: u64, bytes: &[u8]) {
        let mut scan = self.scan.lock();
        for (i, byte) in bytes.iter().enumerate() {
            if *byte == b'\n' {
                scan.line_offset = base_offset + i as u64 + 1;
                scan.prefix.clear();
                scan.matched = false;
                continue;
            }
            if scan.matched || scan.prefix.len() >= MARKER_LEN {
                continue;
            }
            scan.prefix.push(*byte);
            if scan.prefix.len() == MARKER_LEN
                && MARKERS.iter().any(|m| scan.prefix == m.as_slice())
            {
                scan.matched = true;
                let stamp = epoch_ms_to_rfc3339(self.clock.epoch_ms());
                self.pending.lock().insert(scan.line_offset, stamp);
            }
        }
    }

    /// Stop the background uploader and flush anything still pending.
    pub async fn stop(&self) {
        self.stop.cancel();
        let uploader = self.uploader.lock().take();
        if let Some(task) = uploader {
            let _ = task.await;
        }
        post_pending(&*self.client, &self.job_id, &self.pending).await;
    }
}

async fn upload_loop(
    client: Arc<dyn ControlPlane>,
    job_id: String,
    pending: Arc<Mutex<HashMap<u64, String>>>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(POST_INTERVAL) => {}
        }
        post_pending(&*client, &job_id, &pending).await;
    }
}

async fn post_pending(
    client: &dyn ControlPlane,
    job_id: &str,
    pending: &Arc<Mutex<HashMap<u64, String>>>,
) {
    let batch = {
        let mut pending = pending.lock();
        if pending.is_empty() {
            return;
        }
        std::mem::take(&mut *pending)
    };
    if let Err(e) = client.upload_header_times(job_id, &batch).await {
        tracing::warn!(job_id, error = %e, "header time upload failed; will retry next flush");
        let mut pending = pending.lock();
        for (offset, stamp) in batch {
            pending.entry(offset).or_insert(stamp);
        }
    }
}

#[cfg(test)]
#[path = "header_times_tests.rs"]
mod tests;
