// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Executor environment assembly.
//!
//! The executor sees the control plane's merged job env plus the agent's
//! own injections. Protected variables are set last, from agent
//! configuration, so a pipeline-authored value can never override them.

use crate::config::Config;
use pw_core::Job;
use std::collections::HashMap;
use std::path::Path;

pub const ACCESS_TOKEN_ENV: &str = "BUILDKITE_AGENT_ACCESS_TOKEN";
pub const BUILD_PATH_ENV: &str = "BUILDKITE_BUILD_PATH";
pub const HOOKS_PATH_ENV: &str = "BUILDKITE_HOOKS_PATH";
pub const PLUGINS_PATH_ENV: &str = "BUILDKITE_PLUGINS_PATH";
pub const COMMAND_EVAL_ENV: &str = "BUILDKITE_COMMAND_EVAL";
/// Scratch file hooks use to exchange environment changes.
pub const ENV_FILE_ENV: &str = "BUILDKITE_ENV_FILE";

/// Variables the pipeline env is never allowed to set.
pub const PROTECTED_VARS: &[&str] = &[
    ACCESS_TOKEN_ENV,
    BUILD_PATH_ENV,
    HOOKS_PATH_ENV,
    PLUGINS_PATH_ENV,
    COMMAND_EVAL_ENV,
    ENV_FILE_ENV,
];

/// Build the environment map the executor subprocess will see.
pub fn build_executor_env(
    job: &Job,
    config: &Config,
    scratch_dir: &Path,
) -> HashMap<String, String> {
    let mut env = job.env.clone();

    env.insert(ACCESS_TOKEN_ENV.to_string(), job.access_token.clone());
    env.insert(BUILD_PATH_ENV.to_string(), config.build_path.display().to_string());
    env.insert(HOOKS_PATH_ENV.to_string(), config.hooks_path.display().to_string());
    env.insert(PLUGINS_PATH_ENV.to_string(), config.plugins_path.display().to_string());
    env.insert(COMMAND_EVAL_ENV.to_string(), config.command_eval.to_string());
    env.insert(ENV_FILE_ENV.to_string(), scratch_dir.join("environment").display().to_string());

    env
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
