//! Timed action executor: hard deadlines for crisis-path work
//!
//! Work runs on its own task and races a deadline timer. When the timer wins
//! the task is abandoned, not cancelled: it may still finish later, and the
//! caller is responsible for discarding that straggler result.
//!
//! ```text
//! execute(label, work)
//!   ├─ work finishes first → Ok / Err (recorded)
//!   └─ deadline fires first → Err(Timeout) + safety violation + fallback notice
//! ```
//!
//! Every call lands in a bounded performance log whatever the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error};

use crate::error::{EngineError, EngineResult};
use crate::fallback::{FallbackSink, LogFallbackSink, MINIMUM_VIABLE_NOTICE};
use crate::telemetry::SAFETY_TARGET;

/// Outcome of one timed call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Succeeded,
    Failed,
    TimedOut,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One performance log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerfEntry {
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub deadline_ms: u64,
    pub status: ActionStatus,
}

/// A crisis-path call that blew its latency budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyViolation {
    pub label: String,
    pub elapsed_ms: u64,
    pub deadline_ms: u64,
    pub status: ActionStatus,
    pub at: DateTime<Utc>,
}

pub struct TimedExecutor {
    default_deadline: Duration,
    capacity: usize,
    perf_log: Mutex<VecDeque<PerfEntry>>,
    violations: Mutex<VecDeque<SafetyViolation>>,
    violation_count: AtomicU64,
    sink: Arc<dyn FallbackSink>,
}

impl TimedExecutor {
    pub fn new(default_deadline: Duration, capacity: usize) -> Self {
        Self {
            default_deadline,
            capacity: capacity.max(1),
            perf_log: Mutex::new(VecDeque::with_capacity(capacity)),
            violations: Mutex::new(VecDeque::with_capacity(capacity)),
            violation_count: AtomicU64::new(0),
            sink: Arc::new(LogFallbackSink),
        }
    }

    /// Route fallback notices to the host instead of the log.
    pub fn with_fallback_sink(mut self, sink: Arc<dyn FallbackSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn default_deadline(&self) -> Duration {
        self.default_deadline
    }

    /// Run `work` under the default deadline; failures present the
    /// minimum viable notice.
    pub async fn execute<T, F>(&self, label: &str, work: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run(label, self.default_deadline, true, work).await
    }

    pub async fn execute_with_deadline<T, F>(
        &self,
        label: &str,
        deadline: Duration,
        work: F,
    ) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run(label, deadline, true, work).await
    }

    /// Timed and logged, but no notice is presented on failure. For
    /// background verification that has no user in front of it.
    pub async fn execute_silent<T, F>(
        &self,
        label: &str,
        deadline: Duration,
        work: F,
    ) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.run(label, deadline, false, work).await
    }

    async fn run<T, F>(&self, label: &str, deadline: Duration, notify: bool, work: F) -> EngineResult<T>
    where
        F: Future<Output = EngineResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let deadline_ms = deadline.as_millis() as u64;
        let started_at = Utc::now();
        let start = tokio::time::Instant::now();

        // Spawned so a timeout abandons the work instead of dropping it mid-effect.
        let handle = tokio::spawn(work);
        let result = match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) => Err(EngineError::internal(format!(
                "'{label}' aborted: {join_err}"
            ))),
            Err(_) => Err(EngineError::timeout(label, deadline_ms)),
        };

        let elapsed = start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        let status = match &result {
            Ok(_) => ActionStatus::Succeeded,
            Err(EngineError::Timeout { .. }) => ActionStatus::TimedOut,
            Err(_) => ActionStatus::Failed,
        };

        self.push_perf(PerfEntry {
            label: label.to_string(),
            started_at,
            finished_at: Utc::now(),
            elapsed_ms,
            deadline_ms,
            status,
        });

        if status == ActionStatus::TimedOut || elapsed > deadline {
            self.record_violation(label, elapsed_ms, deadline_ms, status);
        }

        match &result {
            Ok(_) => debug!(label, elapsed_ms, "Timed action completed"),
            Err(e) if notify => self.sink.present_fallback(&MINIMUM_VIABLE_NOTICE, &e.to_string()),
            Err(e) => debug!(label, error = %e, "Timed action failed silently"),
        }

        result
    }

    fn push_perf(&self, entry: PerfEntry) {
        if let Ok(mut log) = self.perf_log.lock() {
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }

    fn record_violation(&self, label: &str, elapsed_ms: u64, deadline_ms: u64, status: ActionStatus) {
        self.violation_count.fetch_add(1, Ordering::SeqCst);
        error!(
            target: SAFETY_TARGET,
            label,
            elapsed_ms,
            deadline_ms,
            status = %status,
            "Crisis-path latency budget violated"
        );
        if let Ok(mut violations) = self.violations.lock() {
            if violations.len() == self.capacity {
                violations.pop_front();
            }
            violations.push_back(SafetyViolation {
                label: label.to_string(),
                elapsed_ms,
                deadline_ms,
                status,
                at: Utc::now(),
            });
        }
    }

    /// Oldest first.
    pub fn performance_log(&self) -> Vec<PerfEntry> {
        self.perf_log
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn safety_violations(&self) -> Vec<SafetyViolation> {
        self.violations
            .lock()
            .map(|v| v.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total violations since start, including ones rotated out of the list.
    pub fn violation_count(&self) -> u64 {
        self.violation_count.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackNotice;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSink {
        count: AtomicUsize,
    }

    impl FallbackSink for CountingSink {
        fn present_fallback(&self, _notice: &FallbackNotice, _reason: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn executor_with_sink() -> (TimedExecutor, Arc<CountingSink>) {
        let sink = Arc::new(CountingSink::default());
        let executor =
            TimedExecutor::new(Duration::from_millis(200), 100).with_fallback_sink(sink.clone());
        (executor, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_work_succeeds() {
        let (executor, sink) = executor_with_sink();
        let result = executor
            .execute("dial", async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(sink.count.load(Ordering::SeqCst), 0);
        assert_eq!(executor.violation_count(), 0);
        let log = executor.performance_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, ActionStatus::Succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_work_times_out_and_falls_back() {
        let (executor, sink) = executor_with_sink();
        let result: EngineResult<()> = executor
            .execute("contacts", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(EngineError::Timeout { .. })));
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
        assert_eq!(executor.violation_count(), 1);
        assert_eq!(executor.safety_violations()[0].status, ActionStatus::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_falls_back_without_violation() {
        let (executor, sink) = executor_with_sink();
        let result: EngineResult<()> = executor
            .execute("sms", async { Err(EngineError::unavailable("sms", "no radio")) })
            .await;

        assert!(matches!(result, Err(EngineError::Unavailable { .. })));
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
        assert_eq!(executor.violation_count(), 0);
        assert_eq!(executor.performance_log()[0].status, ActionStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_skips_notice() {
        let (executor, sink) = executor_with_sink();
        let _: EngineResult<()> = executor
            .execute_silent("verify", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;

        assert_eq!(sink.count.load(Ordering::SeqCst), 0);
        assert_eq!(executor.violation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_work_keeps_running() {
        let (executor, _sink) = executor_with_sink();
        let finished = Arc::new(AtomicUsize::new(0));
        let flag = finished.clone();

        let result: EngineResult<()> = executor
            .execute("slow", async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                flag.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_perf_log_bounded() {
        let executor = TimedExecutor::new(Duration::from_millis(200), 3);
        for _ in 0..5 {
            let _ = executor.execute("noop", async { Ok(()) }).await;
        }
        assert_eq!(executor.performance_log().len(), 3);
    }

    #[tokio::test]
    async fn test_panicking_work_is_internal() {
        let (executor, sink) = executor_with_sink();
        let result: EngineResult<u8> = executor
            .execute("boom", async {
                let contacts: Vec<u8> = Vec::new();
                Ok(contacts[0])
            })
            .await;
        assert!(matches!(result, Err(EngineError::Internal { .. })));
        assert_eq!(sink.count.load(Ordering::SeqCst), 1);
    }
}
