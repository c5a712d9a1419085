//! Offline Fallback Manager
//!
//! Serves the bundled crisis resources without touching the network or
//! encrypted storage. Also owns the minimum viable notice: a constant that
//! can be rendered synchronously when anything on the crisis path fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::resources::{CrisisResources, EMERGENCY_NUMBER, PRIMARY_HOTLINE_NUMBER};

/// Distinct degraded reasons kept; the oldest is dropped past this
const MAX_DEGRADED_REASONS: usize = 32;

/// Last-resort message, renderable with no dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FallbackNotice {
    pub message: &'static str,
    pub hotline: &'static str,
    pub emergency: &'static str,
}

pub const MINIMUM_VIABLE_NOTICE: FallbackNotice = FallbackNotice {
    message: "If you are in danger right now, call 911. \
              For support, call or text 988 (Suicide & Crisis Lifeline), available 24/7.",
    hotline: PRIMARY_HOTLINE_NUMBER,
    emergency: EMERGENCY_NUMBER,
};

/// Receives the minimum viable notice.
///
/// Implementations must render or dispatch synchronously and must not await
/// anything.
pub trait FallbackSink: Send + Sync {
    fn present_fallback(&self, notice: &FallbackNotice, reason: &str);
}

/// Sink that only logs; used when the host supplies none.
#[derive(Debug, Default)]
pub struct LogFallbackSink;

impl FallbackSink for LogFallbackSink {
    fn present_fallback(&self, notice: &FallbackNotice, reason: &str) {
        warn!(reason, hotline = notice.hotline, "Presenting minimum viable crisis notice");
    }
}

/// Result of one fallback health check
#[derive(Debug, Clone, Serialize)]
pub struct FallbackHealth {
    pub read_latency_ms: f64,
    pub within_budget: bool,
    pub checked_at: DateTime<Utc>,
}

/// Why the engine is currently relying on offline resources
#[derive(Debug, Clone, Serialize)]
pub struct DegradedReason {
    pub reason: String,
    pub since: DateTime<Utc>,
}

pub struct OfflineFallbackManager {
    bundled: CrisisResources,
    warn_threshold: Duration,
    degraded: AtomicBool,
    reasons: RwLock<Vec<DegradedReason>>,
    last_health: RwLock<Option<FallbackHealth>>,
}

impl OfflineFallbackManager {
    pub fn new(warn_threshold: Duration) -> Self {
        Self {
            bundled: CrisisResources::bundled(),
            warn_threshold,
            degraded: AtomicBool::new(false),
            reasons: RwLock::new(Vec::new()),
            last_health: RwLock::new(None),
        }
    }

    /// Bundled resources; never fails.
    pub fn get_offline_resources(&self) -> CrisisResources {
        self.bundled.clone()
    }

    /// Generic safety message with the hotline numbers inlined.
    pub fn get_offline_message(&self) -> String {
        format!(
            "{} Call {} ({}), text {} to {}, or call {} in an emergency.",
            self.bundled.safety_message,
            self.bundled.hotline.number,
            self.bundled.hotline.name,
            self.bundled.text_line.keyword,
            self.bundled.text_line.number,
            self.bundled.emergency_number,
        )
    }

    pub fn minimum_notice(&self) -> FallbackNotice {
        MINIMUM_VIABLE_NOTICE
    }

    /// Enter degraded mode; subsequent resource lookups prefer the bundle.
    pub fn activate(&self, reason: &str) {
        let was_active = self.degraded.swap(true, Ordering::SeqCst);
        if let Ok(mut reasons) = self.reasons.write() {
            // A repeated report keeps its original `since`
            if !reasons.iter().any(|r| r.reason == reason) {
                if reasons.len() >= MAX_DEGRADED_REASONS {
                    reasons.remove(0);
                }
                reasons.push(DegradedReason {
                    reason: reason.to_string(),
                    since: Utc::now(),
                });
            }
        }
        if !was_active {
            warn!(reason, "Offline fallback activated");
        } else {
            debug!(reason, "Offline fallback already active");
        }
    }

    /// Leave degraded mode once every reported cause has cleared.
    pub fn deactivate(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            if let Ok(mut reasons) = self.reasons.write() {
                reasons.clear();
            }
            info!("Offline fallback deactivated");
        }
    }

    pub fn is_active(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn degraded_reasons(&self) -> Vec<DegradedReason> {
        self.reasons.read().map(|r| r.clone()).unwrap_or_default()
    }

    /// Measure how long reading the fallback path takes.
    pub fn health_check(&self) -> FallbackHealth {
        let span = crate::telemetry::health_span();
        let _guard = span.enter();

        let start = Instant::now();
        let resources = self.get_offline_resources();
        let message = self.get_offline_message();
        let elapsed = start.elapsed();
        let readable = !resources.hotline.number.is_empty() && !message.is_empty();

        span.record("crisis.duration_ms", elapsed.as_millis() as u64);
        self.record_read(elapsed, readable)
    }

    /// Judge one fallback read against the warn threshold and keep it as
    /// the latest health.
    fn record_read(&self, elapsed: Duration, readable: bool) -> FallbackHealth {
        let health = FallbackHealth {
            read_latency_ms: elapsed.as_secs_f64() * 1000.0,
            within_budget: readable && elapsed <= self.warn_threshold,
            checked_at: Utc::now(),
        };

        if !readable {
            warn!("Offline fallback bundle is unreadable");
        } else if !health.within_budget {
            warn!(
                latency_ms = health.read_latency_ms,
                threshold_ms = self.warn_threshold.as_millis() as u64,
                "Offline fallback read exceeded its latency budget"
            );
        }

        if let Ok(mut last) = self.last_health.write() {
            *last = Some(health.clone());
        }
        health
    }

    pub fn last_health(&self) -> Option<FallbackHealth> {
        self.last_health.read().ok().and_then(|h| h.clone())
    }
}

impl Default for OfflineFallbackManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(300))
    }
}
