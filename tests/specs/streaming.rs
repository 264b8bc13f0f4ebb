//! Log streaming specs: ordering, chunk accounting, header times.

use crate::prelude::*;

#[tokio::test]
async fn long_output_arrives_complete_and_in_order() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let mut job = job_for_command("j-long", "seq 1 2000");
    job.chunks_max_size_bytes = 256;
    run_job(job, spec_config(hooks.path(), build.path()), None, &fake).await;

    assert_eq!(report(&fake, "j-long").exit_status, "0");
    assert_eq!(report(&fake, "j-long").chunks_failed_count, 0);

    // Sequences form a gap-free prefix of the positive integers.
    let mut sequences = fake.sequences();
    sequences.sort_unstable();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(sequences, expected);
    assert!(sequences.len() > 1, "output should span multiple chunks");

    // Reassembled in sequence order, the log is intact.
    let log = fake.log_text();
    assert!(log.starts_with("1\n"));
    assert!(log.contains("\n2000\n"));
}

#[tokio::test]
async fn chunks_that_exhaust_retries_are_counted_in_the_report() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();
    fake.state().lock().reject_sequences = vec![1];

    let job = job_for_command("j-dropped", "echo lost to the void");
    run_job(job, spec_config(hooks.path(), build.path()), None, &fake).await;

    let report = report(&fake, "j-dropped");
    assert_eq!(report.exit_status, "0");
    assert!(report.chunks_failed_count >= 1);
}

#[tokio::test]
async fn section_markers_report_their_offsets() {
    let hooks = tempfile::tempdir().unwrap();
    let build = tempfile::tempdir().unwrap();
    let fake = FakeControlPlane::new();

    let job = job_for_command("j-headers", "echo '--- compile'; echo building; echo '+++ test'");
    run_job(job, spec_config(hooks.path(), build.path()), None, &fake).await;

    let state = fake.state();
    let offsets: Vec<u64> = state
        .lock()
        .header_times
        .iter()
        .flat_map(|(_, times)| times.keys().copied().collect::<Vec<_>>())
        .collect();
    assert_eq!(offsets.len(), 2, "both markers should be stamped");
}
