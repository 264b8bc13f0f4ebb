//! Cancellation specs: remote cancellation and the two-phase stop.

use crate::prelude::*;
use pw_core::CancelReason;

#[tokio::test]
async fn remote_cancellation_interrupts_the_job() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = job_for_command("j-cancel", "sleep 60");
    let runner = runner_with(
        job,
        spec_config(hooks.path(), build.path()),
        None,
        Allowlist::default(),
        &fake,
    );

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run().await })
    };

    // Let the executor get going, then have the control plane flip the
    // job to canceling; the poller picks it up within its interval.
    tokio::time::sleep(Duration::from_millis(300)).await;
    fake.set_job_state("canceling");

    tokio::time::timeout(SPEC_WAIT, run)
        .await
        .expect("cancellation should finish the job well inside the budget")
        .unwrap()
        .unwrap();

    let report = report(&fake, "j-cancel");
    assert_eq!(report.signal_reason.as_deref(), Some("cancel"));
    assert_ne!(report.exit_status, "0");
    assert_eq!(report.signal.as_deref(), Some("SIGTERM"));
}

#[tokio::test]
async fn stubborn_processes_are_terminated_after_the_grace_period() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    // The executor shields itself from the interrupt signal; only the
    // second phase can stop it.
    let job = job_for_command("j-stubborn", "trap '' TERM; sleep 60");
    let runner = runner_with(
        job,
        spec_config(hooks.path(), build.path()),
        None,
        Allowlist::default(),
        &fake,
    );

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run().await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    fake.set_job_state("canceling");

    tokio::time::timeout(SPEC_WAIT, run).await.expect("terminate must land").unwrap().unwrap();

    let report = report(&fake, "j-stubborn");
    assert_eq!(report.signal_reason.as_deref(), Some("cancel"));
    assert_eq!(report.signal.as_deref(), Some("SIGKILL"));
}

#[tokio::test]
async fn agent_stop_cancellation_attributes_agent_stop() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = job_for_command("j-agentstop", "sleep 60");
    let runner = runner_with(
        job,
        spec_config(hooks.path(), build.path()),
        None,
        Allowlist::default(),
        &fake,
    );

    let run = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run().await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    runner.cancel(CancelReason::AgentStopping).await;

    tokio::time::timeout(SPEC_WAIT, run).await.unwrap().unwrap().unwrap();

    let report = report(&fake, "j-agentstop");
    assert_eq!(report.signal_reason.as_deref(), Some("agent_stop"));
    assert_ne!(report.exit_status, "0");
}
