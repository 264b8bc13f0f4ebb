//! Signed-job specs: good signatures, bad signatures under both
//! policies, and backend tampering.

use crate::prelude::*;

const SIGNED_FIELDS: &[&str] = &["command", "env", "plugins"];

fn llamas() -> VerificationKey {
    VerificationKey::hmac("2024-01", b"llamas")
}

fn alpacas() -> VerificationKey {
    VerificationKey::hmac("2024-01", b"alpacas")
}

fn signed_job(id: &str, command: &str, key: &VerificationKey) -> Job {
    let mut job = job_for_command(id, command);
    let signature = sign_step(&job.step, &job.env, None, SIGNED_FIELDS, key).unwrap();
    job.step.signature = Some(signature);
    job
}

#[tokio::test]
async fn signed_job_with_matching_key_runs_and_annotates() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = signed_job("j-signed", "echo verified output", &llamas());
    let keys = KeySet::new([llamas()]).unwrap();
    run_job(job, spec_config(hooks.path(), build.path()), Some(keys), &fake).await;

    let report = report(&fake, "j-signed");
    assert_eq!(report.exit_status, "0");
    assert_eq!(report.signal_reason, None);

    let log = fake.log_text();
    assert!(log.contains("~~~ ✅ Job signature verified"));
    assert!(log.contains("verified output"));
}

#[tokio::test]
async fn wrong_key_blocks_the_job() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = signed_job("j-badsig", "echo SHOULD_NOT_RUN", &llamas());
    let keys = KeySet::new([alpacas()]).unwrap();
    run_job(job, spec_config(hooks.path(), build.path()), Some(keys), &fake).await;

    let report = report(&fake, "j-badsig");
    assert_eq!(report.exit_status, "-1");
    assert_eq!(report.signal_reason.as_deref(), Some("signature_rejected"));

    let log = fake.log_text();
    assert!(log.contains("+++ ⛔"));
    assert!(!log.contains("SHOULD_NOT_RUN"));
}

#[tokio::test]
async fn wrong_key_under_warn_policy_still_runs() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = signed_job("j-warned", "echo ran anyway", &llamas());
    let keys = KeySet::new([alpacas()]).unwrap();
    let mut config = spec_config(hooks.path(), build.path());
    config.verification_failure_policy = FailurePolicy::Warn;
    run_job(job, config, Some(keys), &fake).await;

    let report = report(&fake, "j-warned");
    assert_eq!(report.exit_status, "0");
    assert_eq!(report.signal_reason, None);

    let log = fake.log_text();
    assert!(log.contains("+++ ⚠️"));
    assert!(log.contains("ran anyway"));
}

#[tokio::test]
async fn tampered_command_is_rejected_as_a_mismatch() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let mut job = signed_job("j-tampered", "echo hello world", &llamas());
    // The backend swaps the command after signing; the signature still
    // verifies, so only the consistency check can catch this.
    job.env.insert("BUILDKITE_COMMAND".to_string(), "echo 'CRIMES'".to_string());

    let keys = KeySet::new([llamas()]).unwrap();
    run_job(job, spec_config(hooks.path(), build.path()), Some(keys), &fake).await;

    let report = report(&fake, "j-tampered");
    assert_eq!(report.exit_status, "-1");
    assert_eq!(report.signal_reason.as_deref(), Some("signature_rejected"));

    let log = fake.log_text();
    assert!(log.contains("job does not match signed step"));
    assert!(!log.contains("CRIMES"));
}

#[tokio::test]
async fn unsigned_job_is_rejected_when_keys_are_configured() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = job_for_command("j-unsigned", "echo SHOULD_NOT_RUN");
    let keys = KeySet::new([llamas()]).unwrap();
    run_job(job, spec_config(hooks.path(), build.path()), Some(keys), &fake).await;

    let report = report(&fake, "j-unsigned");
    assert_eq!(report.exit_status, "-1");
    assert_eq!(report.signal_reason.as_deref(), Some("signature_rejected"));
    assert!(!fake.log_text().contains("SHOULD_NOT_RUN"));
}
