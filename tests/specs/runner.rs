//! Job lifecycle specs: happy path, refusals, protected env.

use crate::prelude::*;

#[tokio::test]
async fn happy_path_runs_the_command_and_reports_zero() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = job_for_command("j-happy", "echo hello world");
    run_job(job, spec_config(hooks.path(), build.path()), None, &fake).await;

    let report = report(&fake, "j-happy");
    assert_eq!(report.exit_status, "0");
    assert_eq!(report.signal_reason, None);
    assert_eq!(report.signal, None);
    assert_eq!(report.chunks_failed_count, 0);
    assert!(fake.log_text().contains("hello world"));

    // The start report precedes every chunk upload.
    let state = fake.state();
    let state = state.lock();
    assert_eq!(state.started.len(), 1);
    assert!(!state.chunks.is_empty());
}

#[tokio::test]
async fn failing_command_reports_its_exit_code_without_a_reason() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = job_for_command("j-fail", "echo boom; exit 7");
    run_job(job, spec_config(hooks.path(), build.path()), None, &fake).await;

    let report = report(&fake, "j-fail");
    assert_eq!(report.exit_status, "7");
    assert_eq!(report.signal_reason, None);
    assert!(fake.log_text().contains("boom"));
}

#[tokio::test]
async fn protected_env_cannot_be_overridden_by_the_pipeline() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let mut job = job_for_command("j-protected", r#"printf 'eval=%s' "$BUILDKITE_COMMAND_EVAL""#);
    // The pipeline tries to switch command evaluation off.
    job.env.insert("BUILDKITE_COMMAND_EVAL".to_string(), "false".to_string());

    let mut config = spec_config(hooks.path(), build.path());
    config.command_eval = true;
    run_job(job, config, None, &fake).await;

    assert_eq!(report(&fake, "j-protected").exit_status, "0");
    assert!(fake.log_text().contains("eval=true"));
}

#[cfg(unix)]
#[tokio::test]
async fn pre_bootstrap_refusal_blocks_the_executor() {
    use std::os::unix::fs::PermissionsExt;

    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let hook = hooks.path().join("pre-bootstrap");
    std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

    let fake = FakeControlPlane::new();
    let job = job_for_command("j-gated", "echo SHOULD_NOT_RUN");
    run_job(job, spec_config(hooks.path(), build.path()), None, &fake).await;

    let report = report(&fake, "j-gated");
    assert_eq!(report.exit_status, "-1");
    assert_eq!(report.signal_reason.as_deref(), Some("agent_refused"));

    let log = fake.log_text();
    assert!(log.contains("+++ ⛔"));
    assert!(!log.contains("SHOULD_NOT_RUN"));
}

#[tokio::test]
async fn allowlist_rejection_refuses_the_job() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let mut job = job_for_command("j-denied", "echo SHOULD_NOT_RUN");
    job.env.insert(
        "BUILDKITE_REPO".to_string(),
        "git@forge.example:interlopers/app.git".to_string(),
    );

    let allowlist =
        Allowlist::new(&[r"^git@forge\.example:acme/.*$".to_string()], &[], &[]).unwrap();
    let runner = runner_with(
        job,
        spec_config(hooks.path(), build.path()),
        None,
        allowlist,
        &fake,
    );
    tokio::time::timeout(SPEC_WAIT, runner.run()).await.unwrap().unwrap();

    let report = report(&fake, "j-denied");
    assert_eq!(report.exit_status, "-1");
    assert_eq!(report.signal_reason.as_deref(), Some("agent_refused"));
    assert!(!fake.log_text().contains("SHOULD_NOT_RUN"));
}

#[tokio::test]
async fn launch_failure_reports_process_run_error() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    // Point the build path at a plain file so the working directory
    // cannot be created.
    let clash = build.path().join("occupied");
    std::fs::write(&clash, "not a directory").unwrap();

    let fake = FakeControlPlane::new();
    let job = job_for_command("j-nolaunch", "echo SHOULD_NOT_RUN");
    let mut config = spec_config(hooks.path(), build.path());
    config.build_path = clash;
    run_job(job, config, None, &fake).await;

    let report = report(&fake, "j-nolaunch");
    assert_eq!(report.exit_status, "-1");
    assert_eq!(report.signal_reason.as_deref(), Some("process_run_error"));
}
