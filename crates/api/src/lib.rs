// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pw-api: typed control-plane client.
//!
//! The [`ControlPlane`] trait is the seam between the agent and the
//! control plane; [`HttpControlPlane`] speaks the JSON-over-HTTPS wire
//! protocol with unified retry, and the `test-support` feature exposes a
//! recording in-memory fake for other crates' tests.

pub mod client;
pub mod error;
pub mod wire;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use client::{ControlPlane, HttpControlPlane};
pub use error::ApiError;
pub use wire::{FinishRequest, PingAction, PingResponse, StartRequest};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeControlPlane, FakeState, UploadedChunk};
