//! Shared helpers for the agent specs.

pub use pw_agent::{Allowlist, Config, FailurePolicy, JobRunner, Metrics};
pub use pw_api::wire::FinishRequest;
pub use pw_api::FakeControlPlane;
pub use pw_core::{FakeClock, Job, SignalReason};
pub use pw_verify::{sign_step, KeySet, VerificationKey};
pub use std::sync::Arc;
pub use std::time::Duration;

/// Upper bound for any single spec's job.
pub const SPEC_WAIT: Duration = Duration::from_secs(15);

/// Spec config: the executor evaluates the job's command, polls are
/// fast, and hook/build paths live under the given temp dirs.
pub fn spec_config(hooks_dir: &std::path::Path, build_dir: &std::path::Path) -> Config {
    Config {
        bootstrap_command: r#"eval "$BUILDKITE_COMMAND""#.to_string(),
        hooks_path: hooks_dir.to_path_buf(),
        build_path: build_dir.to_path_buf(),
        ping_interval: Duration::from_millis(5),
        job_state_poll_interval: Duration::from_millis(50),
        signal_grace_period: Duration::from_millis(500),
        chunk_interval: Duration::from_millis(20),
        ..Config::default()
    }
}

/// A job whose command is both the envelope command and the signed
/// step's command, the way the control plane delivers it.
pub fn job_for_command(id: &str, command: &str) -> Job {
    let mut job = Job {
        id: id.to_string(),
        access_token: "job-token".to_string(),
        command: command.to_string(),
        ..Job::default()
    };
    job.env.insert("BUILDKITE_COMMAND".to_string(), command.to_string());
    job.step.command = command.to_string();
    job
}

pub fn runner_with(
    job: Job,
    config: Config,
    keys: Option<KeySet>,
    allowlist: Allowlist,
    fake: &FakeControlPlane,
) -> Arc<JobRunner<FakeClock>> {
    JobRunner::new(
        job,
        Arc::new(fake.clone()),
        Arc::new(config),
        keys.map(Arc::new),
        allowlist,
        Arc::new(Metrics::new()),
        FakeClock::new(),
    )
}

/// Run one job to completion and leave its trace on `fake`.
pub async fn run_job(job: Job, config: Config, keys: Option<KeySet>, fake: &FakeControlPlane) {
    let runner = runner_with(job, config, keys, Allowlist::default(), fake);
    tokio::time::timeout(SPEC_WAIT, runner.run())
        .await
        .expect("job should finish inside the spec budget")
        .expect("job runner should complete");
}

pub fn report(fake: &FakeControlPlane, job_id: &str) -> FinishRequest {
    fake.finish_report(job_id).expect("job must post a terminal report")
}
