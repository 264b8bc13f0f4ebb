// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control-plane error taxonomy.

use pw_core::Recoverable;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("invalid endpoint URL: {0}")]
    Url(String),
}

impl Recoverable for ApiError {
    /// Server-side trouble and transport failures are worth retrying;
    /// client errors and malformed responses are terminal.
    fn is_recoverable(&self) -> bool {
        match self {
            ApiError::Network(e) => !e.is_decode(),
            ApiError::Http { status, .. } => *status >= 500,
            ApiError::Url(_) => false,
        }
    }
}
