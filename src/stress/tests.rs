use super::*;

use tokio::time::timeout as tokio_timeout;

use crate::bus::FanOutBus;
use crate::journal::{JournalStore, RunFilters};

fn runner() -> (StressRunner, Arc<JournalStore>) {
    let journal = Arc::new(JournalStore::open_in_memory().unwrap());
    let bus = Arc::new(FanOutBus::new());
    (StressRunner::new(journal.clone(), bus), journal)
}

#[tokio::test]
async fn spawn_failure_marks_run_failed() {
    let (runner, journal) = runner();
    let err = runner
        .run("definitely-not-a-real-binary-xyz", None)
        .await
        .unwrap_err();
    assert!(matches!(err, crate::errors::TraceError::SpawnFailed(_)));

    let runs = journal.list_runs(RunFilters::default()).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
}

#[tokio::test]
async fn a_subprocess_that_never_replies_times_out_without_hanging_the_sweep() {
    // `cat` only echoes the initialize request verbatim — it still carries
    // a "method" field, so this harness never recognizes it as a matching
    // response, and the init handshake itself times out.
    let (runner, _journal) = runner();
    let runner = runner.with_probe_timeout(Duration::from_millis(200));
    let result = tokio_timeout(Duration::from_secs(5), runner.run("cat", None)).await;
    assert!(result.is_ok(), "run() should return rather than hang forever");
}
