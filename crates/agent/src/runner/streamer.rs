// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ordered, sequence-numbered log chunk uploads.
//!
//! `process` turns drained output-buffer bytes into gzip chunks with
//! monotonically increasing sequence numbers and hands them to a fixed
//! pool of upload workers. Sequence numbers are assigned at emit time,
//! so delivery order does not matter: the control plane is idempotent on
//! sequence and at-least-once delivery is fine. A chunk that exhausts
//! its retry budget (or is rejected outright) is dropped and counted.

use pw_api::{ApiError, ControlPlane};
use pw_core::Retrier;
use std::io::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fixed size of the upload worker pool.
pub const UPLOAD_WORKERS: usize = 4;

/// Queue depth at which `process` starts refusing new chunks.
pub const QUEUE_HIGH_WATERMARK: usize = 20;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("log upload queue is backed up ({0} chunks pending)")]
    Backpressure(usize),

    #[error("failed to compress chunk: {0}")]
    Compress(#[from] std::io::Error),
}

/// One sequenced slice of the job log.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// 1-based, strictly increasing, gap-free.
    pub sequence: u64,
    /// Offset of the first byte in the job's output history.
    pub offset: u64,
    /// Uncompressed size.
    pub size: usize,
    /// Gzip-compressed bytes.
    pub payload: Vec<u8>,
}

/// Chunker plus upload worker pool for one job.
pub struct LogStreamer {
    job_id: String,
    max_chunk_bytes: usize,
    tx: parking_lot::Mutex<Option<mpsc::UnboundedSender<Chunk>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    queued: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
    next_sequence: AtomicU64,
}

impl LogStreamer {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        job_id: &str,
        max_chunk_bytes: usize,
        retrier: Retrier,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Chunk>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let queued = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));

        let workers = (0..UPLOAD_WORKERS)
            .map(|worker| {
                tokio::spawn(upload_worker(
                    worker,
                    client.clone(),
                    job_id.to_string(),
                    rx.clone(),
                    retrier.clone(),
                    queued.clone(),
                    failed.clone(),
                ))
            })
            .collect();

        Self {
            job_id: job_id.to_string(),
            max_chunk_bytes: max_chunk_bytes.max(1),
            tx: parking_lot::Mutex::new(Some(tx)),
            workers: parking_lot::Mutex::new(workers),
            queued,
            failed,
            next_sequence: AtomicU64::new(0),
        }
    }

    /// Chunk `bytes` (drained from the output buffer at `offset`) and
    /// enqueue the chunks for upload. Refuses with backpressure when the
    /// queue is over the high watermark; the caller reacts by closing
    /// the output buffer.
    pub fn process(&self, offset: u64, bytes: Vec<u8>) -> Result<(), StreamError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let pending = self.queued.load(Ordering::SeqCst);
        if pending > QUEUE_HIGH_WATERMARK {
            return Err(StreamError::Backpressure(pending));
        }

        for (i, slice) in bytes.chunks(self.max_chunk_bytes).enumerate() {
            let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let chunk = Chunk {
                sequence,
                offset: offset + (i * self.max_chunk_bytes) as u64,
                size: slice.len(),
                payload: compress(slice)?,
            };
            self.queued.fetch_add(1, Ordering::SeqCst);
            let tx = self.tx.lock();
            match tx.as_ref().map(|tx| tx.send(chunk)) {
                Some(Ok(())) => {}
                _ => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    tracing::warn!(job_id = %self.job_id, sequence, "chunk dropped: streamer stopped");
                }
            }
        }
        Ok(())
    }

    /// Chunks that exhausted their retry budget or were rejected.
    pub fn failed_chunks(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Sequence numbers emitted so far.
    pub fn emitted(&self) -> u64 {
        self.next_sequence.load(Ordering::SeqCst)
    }

    /// Close the queue and wait for the workers to drain it (bounded by
    /// each chunk's retry policy).
    pub async fn stop(&self) {
        self.tx.lock().take();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }
}

async fn upload_worker(
    worker: usize,
    client: Arc<dyn ControlPlane>,
    job_id: String,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Chunk>>>,
    retrier: Retrier,
    queued: Arc<AtomicUsize>,
    failed: Arc<AtomicUsize>,
) {
    loop {
        let chunk = { rx.lock().await.recv().await };
        let Some(chunk) = chunk else {
            break;
        };
        let result: Result<(), ApiError> = retrier
            .run(|_attempt| client.upload_chunk(&job_id, chunk.sequence, &chunk.payload))
            .await;
        match result {
            Ok(()) => {
                tracing::trace!(job_id = %job_id, worker, sequence = chunk.sequence, size = chunk.size, "chunk uploaded");
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(job_id = %job_id, worker, sequence = chunk.sequence, error = %e, "chunk dropped after retries");
            }
        }
        queued.fetch_sub(1, Ordering::SeqCst);
    }
}

fn compress(bytes: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
#[path = "streamer_tests.rs"]
mod tests;
