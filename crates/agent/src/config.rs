// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration from `PW_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("PW_ENDPOINT is required")]
    MissingEndpoint,

    #[error("PW_AGENT_TOKEN is required")]
    MissingToken,

    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

/// What to do when job verification fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Refuse the job without running it.
    #[default]
    Block,
    /// Annotate the job log and run anyway.
    Warn,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(FailurePolicy::Block),
            "warn" => Ok(FailurePolicy::Warn),
            other => Err(format!("unknown failure policy {other}")),
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailurePolicy::Block => f.write_str("block"),
            FailurePolicy::Warn => f.write_str("warn"),
        }
    }
}

/// Agent configuration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    /// Control-plane base URL.
    pub endpoint: String,
    /// Agent registration token.
    pub token: String,

    pub build_path: PathBuf,
    pub hooks_path: PathBuf,
    pub plugins_path: PathBuf,

    /// Shell command that launches the job executor.
    pub bootstrap_command: String,
    /// Value of the protected command-eval toggle.
    pub command_eval: bool,

    /// Signal sent by a cancellation's first phase.
    pub interrupt_signal: String,
    /// How long to wait between interrupt and terminate.
    pub signal_grace_period: Duration,

    /// Sleep between pings while idle.
    pub ping_interval: Duration,
    /// Cadence of the cancellation poller.
    pub job_state_poll_interval: Duration,
    /// Default log processing interval (jobs may override).
    pub chunk_interval: Duration,

    /// Verification key file; absent means unsigned pipelines are fine.
    pub verification_key_file: Option<PathBuf>,
    pub verification_failure_policy: FailurePolicy,

    pub allowed_repositories: Vec<String>,
    pub allowed_env_names: Vec<String>,
    pub allowed_plugins: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            build_path: PathBuf::from("."),
            hooks_path: PathBuf::from("hooks"),
            plugins_path: PathBuf::from("plugins"),
            bootstrap_command: "pw-bootstrap".to_string(),
            command_eval: true,
            interrupt_signal: "SIGTERM".to_string(),
            signal_grace_period: Duration::from_secs(10),
            ping_interval: Duration::from_secs(5),
            job_state_poll_interval: Duration::from_secs(3),
            chunk_interval: Duration::from_secs(1),
            verification_key_file: None,
            verification_failure_policy: FailurePolicy::Block,
            allowed_repositories: Vec::new(),
            allowed_env_names: Vec::new(),
            allowed_plugins: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from `PW_*` environment variables.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            endpoint: required("PW_ENDPOINT").ok_or(ConfigError::MissingEndpoint)?,
            token: required("PW_AGENT_TOKEN").ok_or(ConfigError::MissingToken)?,
            build_path: path_var("PW_BUILD_PATH", defaults.build_path),
            hooks_path: path_var("PW_HOOKS_PATH", defaults.hooks_path),
            plugins_path: path_var("PW_PLUGINS_PATH", defaults.plugins_path),
            bootstrap_command: string_var("PW_BOOTSTRAP_COMMAND", defaults.bootstrap_command),
            command_eval: bool_var("PW_COMMAND_EVAL", defaults.command_eval)?,
            interrupt_signal: string_var("PW_INTERRUPT_SIGNAL", defaults.interrupt_signal),
            signal_grace_period: duration_ms_var(
                "PW_SIGNAL_GRACE_PERIOD_MS",
                defaults.signal_grace_period,
            )?,
            ping_interval: duration_ms_var("PW_PING_INTERVAL_MS", defaults.ping_interval)?,
            job_state_poll_interval: duration_ms_var(
                "PW_JOB_STATE_POLL_MS",
                defaults.job_state_poll_interval,
            )?,
            chunk_interval: duration_ms_var("PW_CHUNK_INTERVAL_MS", defaults.chunk_interval)?,
            verification_key_file: std::env::var("PW_VERIFICATION_KEYS").ok().map(PathBuf::from),
            verification_failure_policy: policy_var(
                "PW_VERIFICATION_FAILURE_BEHAVIOR",
                defaults.verification_failure_policy,
            )?,
            allowed_repositories: list_var("PW_ALLOWED_REPOSITORIES"),
            allowed_env_names: list_var("PW_ALLOWED_ENV_VARS"),
            allowed_plugins: list_var("PW_ALLOWED_PLUGINS"),
        })
    }
}

fn required(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn string_var(var: &str, default: String) -> String {
    std::env::var(var).ok().filter(|v| !v.is_empty()).unwrap_or(default)
}

fn path_var(var: &str, default: PathBuf) -> PathBuf {
    std::env::var(var).ok().filter(|v| !v.is_empty()).map(PathBuf::from).unwrap_or(default)
}

fn bool_var(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => match value.as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid { var, value }),
        },
    }
}

fn duration_ms_var(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => value
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

fn policy_var(var: &'static str, default: FailurePolicy) -> Result<FailurePolicy, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(value) => value.parse().map_err(|_| ConfigError::Invalid { var, value }),
    }
}

/// Comma-separated list; empty entries are dropped.
fn list_var(var: &str) -> Vec<String> {
    std::env::var(var)
        .ok()
        .map(|raw| {
            raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
