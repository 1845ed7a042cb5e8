//! Bounded fan-out of an executor over a host set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::host::Host;
use crate::hostset::HostSet;
use crate::result::{HistoryItem, OutputLine, RunResult};

/// Runs one command on one host.
///
/// Implementations must honour the cancellation token at every suspension
/// point and report failures inside the returned result rather than
/// panicking or propagating them.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Runs `command` on `host`, streaming output into `output` when given.
    async fn run(
        &self,
        token: &CancellationToken,
        host: &Arc<Host>,
        command: &str,
        output: Option<mpsc::Sender<OutputLine>>,
    ) -> RunResult;

    /// Propagates a changed dial deadline. Executors without a dial stage
    /// ignore this.
    fn set_connect_timeout(&self, _timeout: Duration) {}
}

/// Fan-out configuration and execution.
pub struct Runner {
    executor: Arc<dyn Executor>,
    parallel: usize,
    timeout: Duration,
    host_timeout: Duration,
}

impl Runner {
    /// Creates a runner over `executor`.
    pub fn new(
        executor: Arc<dyn Executor>,
        parallel: usize,
        timeout: Duration,
        host_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            parallel: parallel.max(1),
            timeout,
            host_timeout,
        }
    }

    /// Runs `command` on every host in the set with bounded parallelism.
    ///
    /// Worker `i` takes hosts `i`, `i+P`, … (round-robin dispatch). Each
    /// host gets a child token cancelled after the host timeout; the batch
    /// token is cancelled after the whole-run timeout, which cancels all
    /// in-flight per-host tokens. The output channel closes exactly once,
    /// when the last worker has returned and the sender clones are dropped.
    pub async fn run(
        &self,
        hosts: &HostSet,
        command: &str,
        output: Option<mpsc::Sender<OutputLine>>,
    ) -> HistoryItem {
        let start_time = Utc::now();
        let results: Arc<Mutex<BTreeMap<String, RunResult>>> =
            Arc::new(Mutex::new(BTreeMap::new()));

        let batch_token = CancellationToken::new();
        let batch_watchdog = tokio::spawn({
            let token = batch_token.clone();
            let timeout = self.timeout;
            async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            }
        });

        let workers = self.parallel.min(hosts.len()).max(1);
        debug!(hosts = hosts.len(), workers, command, "Starting run");
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let my_hosts: Vec<Arc<Host>> = hosts
                .iter()
                .skip(worker)
                .step_by(workers)
                .cloned()
                .collect();
            let executor = self.executor.clone();
            let command = command.to_string();
            let output = output.clone();
            let results = results.clone();
            let batch_token = batch_token.clone();
            let host_timeout = self.host_timeout;
            handles.push(tokio::spawn(async move {
                for host in my_hosts {
                    let host_token = batch_token.child_token();
                    let watchdog = tokio::spawn({
                        let token = host_token.clone();
                        async move {
                            tokio::time::sleep(host_timeout).await;
                            token.cancel();
                        }
                    });
                    let result = executor
                        .run(&host_token, &host, &command, output.clone())
                        .await;
                    watchdog.abort();
                    host.set_last_result(Arc::new(result.clone()));
                    results.lock().insert(host.name.clone(), result);
                }
            }));
        }
        drop(output);

        for handle in handles {
            let _ = handle.await;
        }
        batch_watchdog.abort();

        let results = match Arc::try_unwrap(results) {
            Ok(results) => results.into_inner(),
            Err(shared) => shared.lock().clone(),
        };
        HistoryItem {
            command: command.to_string(),
            start_time,
            end_time: Utc::now(),
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Attributes;
    use crate::result::RunError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Executor that records its peak concurrency and honours cancellation.
    struct ScriptedExecutor {
        delay: Duration,
        live: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                live: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
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
                        let _ = output.send(OutputLine {
                            host: host.name.clone(),
                            stderr: false,
                            data: b"done\n".to_vec(),
                        }).await;
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

    fn hosts(n: usize) -> HostSet {
        (0..n)
            .map(|i| Arc::new(Host::new(format!("host-{:02}", i), "", Attributes::new())))
            .collect()
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(20)));
        let runner = Runner::new(
            executor.clone(),
            4,
            Duration::from_secs(10),
            Duration::from_secs(5),
        );
        let set = hosts(16);
        let item = runner.run(&set, "uptime", None).await;
        assert_eq!(item.results.len(), 16);
        assert!(executor.peak.load(Ordering::SeqCst) <= 4);
        assert!(item.results.values().all(|r| r.success()));
    }

    #[tokio::test]
    async fn test_output_channel_closes_after_all_workers() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(5)));
        let runner = Runner::new(
            executor,
            2,
            Duration::from_secs(10),
            Duration::from_secs(5),
        );
        let set = hosts(6);
        let (tx, mut rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move {
            let mut lines = 0;
            while rx.recv().await.is_some() {
                lines += 1;
            }
            lines
        });
        let item = runner.run(&set, "uptime", Some(tx)).await;
        // The channel must close exactly once: the drain task finishes.
        let lines = drain.await.unwrap();
        assert_eq!(lines, 6);
        assert_eq!(item.results.len(), 6);
    }

    #[tokio::test]
    async fn test_host_timeout_cancels_slow_hosts() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_secs(10)));
        let runner = Runner::new(
            executor,
            4,
            Duration::from_secs(30),
            Duration::from_millis(100),
        );
        let set = hosts(2);
        let item = runner.run(&set, "sleep 10", None).await;
        for result in item.results.values() {
            let err = result.err.as_ref().expect("expected a timeout");
            assert!(err.is_timeout());
            assert_eq!(result.exit_status, -1);
            assert!(result.elapsed_time >= 0.09 && result.elapsed_time < 2.0);
        }
    }

    #[tokio::test]
    async fn test_batch_timeout_cancels_everything() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_secs(10)));
        let runner = Runner::new(
            executor,
            1,
            Duration::from_millis(100),
            Duration::from_secs(30),
        );
        let set = hosts(3);
        let item = runner.run(&set, "sleep 10", None).await;
        assert_eq!(item.results.len(), 3);
        assert!(item
            .results
            .values()
            .all(|r| r.err.as_ref().is_some_and(|e| e.is_timeout())));
    }

    #[tokio::test]
    async fn test_last_result_is_attached_to_hosts() {
        let executor = Arc::new(ScriptedExecutor::new(Duration::from_millis(1)));
        let runner = Runner::new(
            executor,
            2,
            Duration::from_secs(10),
            Duration::from_secs(5),
        );
        let set = hosts(2);
        runner.run(&set, "uptime", None).await;
        for host in &set {
            let result = host.last_result().expect("result recorded");
            assert_eq!(result.exit_status, 0);
        }
    }
}
