//! Fan-out behaviour through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use herd::host::{Attributes, Host};
use herd::hostset::HostSet;
use herd::result::{OutputLine, RunError, RunResult};
use herd::runner::{Executor, Runner};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Pretends every command sleeps for a fixed time, honouring cancellation
// the way the SSH executor does.
struct SleepyExecutor {
    delay: Duration,
    live: AtomicUsize,
    peak: AtomicUsize,
}

impl SleepyExecutor {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            live: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Executor for SleepyExecutor {
    async fn run(
        &self,
        token: &CancellationToken,
        host: &Arc<Host>,
        _command: &str,
        output: Option<mpsc::Sender<OutputLine>>,
    ) -> RunResult {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);

        let mut result = RunResult::started(&host.name);
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {
                if let Some(output) = &output {
                    let _ = output
                        .send(OutputLine {
                            host: host.name.clone(),
                            stderr: false,
                            data: b"13:37 up 3 days\n".to_vec(),
                        })
                        .await;
                }
                result.exit_status = 0;
            }
            _ = token.cancelled() => {
                result.err = Some(RunError::Timeout(
                    "Timed out while executing command".into(),
                ));
            }
        }
        result.finish();
        self.live.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn fleet(n: usize) -> HostSet {
    (0..n)
        .map(|i| Arc::new(Host::new(format!("host-{:03}.example.com", i), "", Attributes::new())))
        .collect()
}

#[tokio::test]
async fn test_never_more_than_parallel_sessions() {
    let executor = SleepyExecutor::new(Duration::from_millis(15));
    let runner = Runner::new(
        executor.clone(),
        8,
        Duration::from_secs(30),
        Duration::from_secs(10),
    );
    let item = runner.run(&fleet(40), "uptime", None).await;
    assert_eq!(item.results.len(), 40);
    assert!(
        executor.peak.load(Ordering::SeqCst) <= 8,
        "peak concurrency {} exceeded the limit",
        executor.peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn test_streamed_output_arrives_and_channel_closes() {
    let executor = SleepyExecutor::new(Duration::from_millis(2));
    let runner = Runner::new(
        executor,
        4,
        Duration::from_secs(30),
        Duration::from_secs(10),
    );
    let (tx, mut rx) = mpsc::channel(8);
    let drain = tokio::spawn(async move {
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        lines
    });
    runner.run(&fleet(10), "uptime", Some(tx)).await;
    let lines = drain.await.unwrap();
    assert_eq!(lines.len(), 10);
    assert!(lines.iter().all(|l| l.data.ends_with(b"\n") && !l.stderr));
}

#[tokio::test]
async fn test_host_timeout_shapes_the_result() {
    // A host that sleeps 10s against a 100ms deadline: TimeoutError,
    // exit status -1, elapsed about the deadline.
    let executor = SleepyExecutor::new(Duration::from_secs(10));
    let runner = Runner::new(
        executor,
        2,
        Duration::from_secs(60),
        Duration::from_millis(100),
    );
    let item = runner.run(&fleet(1), "sleep 10", None).await;
    let result = &item.results["host-000.example.com"];
    assert!(matches!(result.err, Some(RunError::Timeout(_))));
    assert_eq!(result.exit_status, -1);
    assert!(
        result.elapsed_time >= 0.09 && result.elapsed_time < 1.0,
        "elapsed {} not near the deadline",
        result.elapsed_time
    );
}

#[tokio::test]
async fn test_results_are_keyed_by_host_name() {
    let executor = SleepyExecutor::new(Duration::from_millis(1));
    let runner = Runner::new(
        executor,
        3,
        Duration::from_secs(30),
        Duration::from_secs(10),
    );
    let hosts = fleet(7);
    let item = runner.run(&hosts, "uptime", None).await;
    for host in &hosts {
        assert!(item.results.contains_key(&host.name));
    }
}
