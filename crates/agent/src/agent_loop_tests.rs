// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tests for the ping/accept/run loop.

use super::*;
use pw_api::wire::PingResponse;
use pw_api::FakeControlPlane;
use pw_core::FakeClock;
use std::time::Duration;

fn fast_config() -> Arc<Config> {
    Arc::new(Config {
        ping_interval: Duration::from_millis(5),
        job_state_poll_interval: Duration::from_millis(20),
        signal_grace_period: Duration::from_millis(200),
        chunk_interval: Duration::from_millis(20),
        bootstrap_command: "true".to_string(),
        build_path: std::env::temp_dir().join("pw-agent-loop-tests"),
        ..Config::default()
    })
}

fn agent_loop(fake: &FakeControlPlane, signals: &ShutdownSignals) -> AgentLoop<FakeClock> {
    AgentLoop::new(
        Arc::new(fake.clone()),
        fast_config(),
        None,
        Arc::new(Metrics::new()),
        signals,
        FakeClock::new(),
    )
    .unwrap()
}

fn push_ping(fake: &FakeControlPlane, response: PingResponse) {
    fake.state().lock().pings.push_back(response);
}

#[tokio::test]
async fn stop_action_ends_the_loop() {
    let fake = FakeControlPlane::new();
    push_ping(&fake, PingResponse { action: Some("stop".into()), job: None });
    let signals = ShutdownSignals::manual();
    agent_loop(&fake, &signals).run().await;
    assert!(fake.state().lock().finishes.is_empty());
}

#[tokio::test]
async fn offered_job_is_accepted_run_and_reported() {
    let job = Job {
        id: "j1".into(),
        access_token: "job-token".into(),
        command: "true".into(),
        ..Job::default()
    };
    let fake = FakeControlPlane::with_job(job);
    push_ping(&fake, PingResponse { action: Some("stop".into()), job: None });

    let signals = ShutdownSignals::manual();
    agent_loop(&fake, &signals).run().await;

    let state = fake.state();
    let state = state.lock();
    assert_eq!(state.accepted, vec!["j1"]);
    assert_eq!(state.tokens, vec!["job-token"]);
    assert_eq!(state.started.len(), 1);
    assert_eq!(state.finishes.len(), 1);
    assert_eq!(state.finishes[0].1.exit_status, "0");
}

#[tokio::test]
async fn graceful_stop_breaks_the_loop_between_jobs() {
    let fake = FakeControlPlane::new();
    let signals = ShutdownSignals::manual();
    signals.graceful.cancel();
    // No scripted pings are consumed: the loop exits up front.
    agent_loop(&fake, &signals).run().await;
    assert!(fake.state().lock().accepted.is_empty());
}

#[tokio::test]
async fn forced_stop_cancels_the_running_job() {
    let job = Job { id: "j-forced".into(), command: "sleep 30".into(), ..Job::default() };
    let fake = FakeControlPlane::with_job(job);
    // After the job the loop should leave via graceful stop.
    let signals = ShutdownSignals::manual();

    let agent = {
        let fake = fake.clone();
        let signals = signals.clone();
        let config = Arc::new(Config {
            bootstrap_command: "sleep 30".to_string(),
            ..(*fast_config()).clone()
        });
        tokio::spawn(async move {
            AgentLoop::new(
                Arc::new(fake),
                config,
                None,
                Arc::new(Metrics::new()),
                &signals,
                FakeClock::new(),
            )
            .unwrap()
            .run()
            .await;
        })
    };

    // Let the executor start, then force a stop.
    tokio::time::sleep(Duration::from_millis(300)).await;
    signals.graceful.cancel();
    signals.forced.cancel();

    tokio::time::timeout(Duration::from_secs(10), agent).await.expect("agent loop should exit").unwrap();

    let report = fake.finish_report("j-forced").expect("job must be reported");
    assert_eq!(report.signal_reason.as_deref(), Some("agent_stop"));
    assert_ne!(report.exit_status, "0");
}
