// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for repository, env-var, and plugin allowlists.

use super::*;
use serde_json::json;

fn job_with_repo(repo: &str) -> Job {
    let mut job = Job::default();
    job.env.insert(REPOSITORY_ENV.to_string(), repo.to_string());
    job
}

fn list(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| p.to_string()).collect()
}

#[test]
fn empty_lists_allow_everything() {
    let allowlist = Allowlist::default();
    assert!(allowlist.is_unrestricted());
    let mut job = job_with_repo("git@example.com:anyone/anything.git");
    job.env.insert("ARBITRARY".into(), "1".into());
    job.step.plugins = Some(json!([{"docker#v5": {}}]));
    allowlist.check_job(&job).unwrap();
}

#[test]
fn repository_must_match_when_configured() {
    let allowlist =
        Allowlist::new(&list(&[r"^git@example\.com:acme/.*$"]), &[], &[]).unwrap();

    allowlist.check_job(&job_with_repo("git@example.com:acme/app.git")).unwrap();

    let err = allowlist.check_job(&job_with_repo("git@evil.example:acme/app.git")).unwrap_err();
    assert!(matches!(err, AllowlistError::Repository(_)));
}

#[test]
fn missing_repository_fails_a_configured_list() {
    let allowlist = Allowlist::new(&list(&[".*"]), &[], &[]).unwrap();
    let err = allowlist.check_job(&Job::default()).unwrap_err();
    assert!(matches!(err, AllowlistError::Repository(r) if r.is_empty()));
}

#[test]
fn env_names_outside_the_list_are_refused() {
    let allowlist = Allowlist::new(&[], &list(&[r"^DEPLOY_.*$"]), &[]).unwrap();

    let mut job = Job::default();
    job.env.insert("DEPLOY_TARGET".into(), "prod".into());
    allowlist.check_job(&job).unwrap();

    job.env.insert("SNEAKY".into(), "1".into());
    let err = allowlist.check_job(&job).unwrap_err();
    assert!(matches!(err, AllowlistError::EnvVar(name) if name == "SNEAKY"));
}

#[test]
fn control_plane_env_names_are_exempt() {
    let allowlist = Allowlist::new(&[], &list(&[r"^DEPLOY_.*$"]), &[]).unwrap();
    let mut job = Job::default();
    job.env.insert("BUILDKITE_COMMAND".into(), "true".into());
    job.env.insert("BUILDKITE_REPO".into(), "git@example.com:a/b".into());
    allowlist.check_job(&job).unwrap();
}

#[test]
fn plugin_sources_must_match_when_configured() {
    let allowlist =
        Allowlist::new(&[], &[], &list(&[r"^docker#v\d.*$", r"^cache#.*$"])).unwrap();

    let mut job = Job::default();
    job.step.plugins = Some(json!([{"docker#v5.0.0": {"image": "alpine"}}, "cache#v1"]));
    allowlist.check_job(&job).unwrap();

    job.step.plugins = Some(json!([{"exfiltrate#v1": {}}]));
    let err = allowlist.check_job(&job).unwrap_err();
    assert!(matches!(err, AllowlistError::Plugin(source) if source == "exfiltrate#v1"));
}

#[test]
fn invalid_patterns_fail_construction() {
    assert!(Allowlist::new(&list(&["("]), &[], &[]).is_err());
}
