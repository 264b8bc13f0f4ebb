// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pre-bootstrap gate hook.
//!
//! Operators can place a `pre-bootstrap` executable in the agent's hooks
//! directory to veto jobs before the executor launches. Exit 0 allows
//! the job; anything else refuses it. The hook sees the job's
//! environment, and its own output never reaches the job log.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("pre-bootstrap hook refused the job (exit status {status})")]
    Refused { status: i32 },

    #[error("failed to run pre-bootstrap hook: {0}")]
    Run(#[from] std::io::Error),
}

#[cfg(not(windows))]
const PRE_BOOTSTRAP_NAMES: &[&str] = &["pre-bootstrap"];
#[cfg(windows)]
const PRE_BOOTSTRAP_NAMES: &[&str] = &["pre-bootstrap.bat", "pre-bootstrap.ps1"];

/// The hook that would run for `hooks_path`, if one exists.
pub fn find_pre_bootstrap(hooks_path: &Path) -> Option<PathBuf> {
    PRE_BOOTSTRAP_NAMES.iter().map(|name| hooks_path.join(name)).find(|p| p.is_file())
}

/// Run the operator's pre-bootstrap hook with the job environment.
/// Missing hook means the job is allowed.
pub async fn run_pre_bootstrap(
    hooks_path: &Path,
    env: &HashMap<String, String>,
) -> Result<(), HookError> {
    let Some(hook) = find_pre_bootstrap(hooks_path) else {
        return Ok(());
    };
    tracing::info!(hook = %hook.display(), "running pre-bootstrap hook");

    let status = Command::new(&hook)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    if status.success() {
        Ok(())
    } else {
        Err(HookError::Refused { status: status.code().unwrap_or(-1) })
    }
}

#[cfg(test)]
#[path = "hooks_tests.rs"]
mod tests;
