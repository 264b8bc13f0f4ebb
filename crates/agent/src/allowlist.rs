// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator allowlists for repositories, environment variables, and
//! plugin sources.
//!
//! Empty lists are unrestricted. A configured list must match the
//! corresponding job attribute or the job is refused before the
//! executor launches.

use pw_core::Job;
use regex::Regex;
use thiserror::Error;

/// Job-env key naming the repository being built.
pub const REPOSITORY_ENV: &str = "BUILDKITE_REPO";

/// Control-plane and agent variables are exempt from the env-name
/// allowlist; only pipeline-authored variables are subject to it.
const EXEMPT_ENV_PREFIX: &str = "BUILDKITE_";

#[derive(Debug, Error)]
pub enum AllowlistError {
    #[error("repository {0} is not allowed by this agent")]
    Repository(String),

    #[error("environment variable {0} is not allowed by this agent")]
    EnvVar(String),

    #[error("plugin {0} is not allowed by this agent")]
    Plugin(String),
}

#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    repositories: Vec<Regex>,
    env_names: Vec<Regex>,
    plugin_sources: Vec<Regex>,
}

impl Allowlist {
    pub fn new(
        repositories: &[String],
        env_names: &[String],
        plugin_sources: &[String],
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            repositories: compile(repositories)?,
            env_names: compile(env_names)?,
            plugin_sources: compile(plugin_sources)?,
        })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.repositories.is_empty() && self.env_names.is_empty() && self.plugin_sources.is_empty()
    }

    /// Validate `job` against all configured lists.
    pub fn check_job(&self, job: &Job) -> Result<(), AllowlistError> {
        if !self.repositories.is_empty() {
            let repo = job.env.get(REPOSITORY_ENV).map(String::as_str).unwrap_or("");
            if !self.repositories.iter().any(|re| re.is_match(repo)) {
                return Err(AllowlistError::Repository(repo.to_string()));
            }
        }

        if !self.env_names.is_empty() {
            for name in job.env.keys() {
                if name.starts_with(EXEMPT_ENV_PREFIX) {
                    continue;
                }
                if !self.env_names.iter().any(|re| re.is_match(name)) {
                    return Err(AllowlistError::EnvVar(name.clone()));
                }
            }
        }

        if !self.plugin_sources.is_empty() {
            for source in plugin_sources(job) {
                if !self.plugin_sources.iter().any(|re| re.is_match(&source)) {
                    return Err(AllowlistError::Plugin(source));
                }
            }
        }

        Ok(())
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>, regex::Error> {
    patterns.iter().map(|p| Regex::new(p)).collect()
}

/// Plugin source references declared by the step, e.g.
/// `docker#v5.0.0` from `[{"docker#v5.0.0": {...}}]`.
fn plugin_sources(job: &Job) -> Vec<String> {
    let Some(serde_json::Value::Array(plugins)) = &job.step.plugins else {
        return Vec::new();
    };
    let mut sources = Vec::new();
    for plugin in plugins {
        match plugin {
            serde_json::Value::String(source) => sources.push(source.clone()),
            serde_json::Value::Object(map) => sources.extend(map.keys().cloned()),
            _ => {}
        }
    }
    sources
}

#[cfg(test)]
#[path = "allowlist_tests.rs"]
mod tests;
