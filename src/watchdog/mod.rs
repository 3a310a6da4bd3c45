//! Watchdog scheduler and the closed set of periodic loops (spec §4.2).
//!
//! Each loop is its own [`WatchdogLoop`] — "`WatchdogLoop` implementations,
//! not one loop wearing two hats" — driven by a single [`Scheduler`] that
//! owns quiet-hours suppression and the per-agent alert cooldown shared
//! across loops.

pub mod loops;

use crate::clock::Clock;
use crate::config::{BoardHealthConfig, QuietHoursConfig};
use async_trait::async_trait;
use chrono::{TimeZone, Timelike};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Result of a single loop tick, surfaced via `/health/*` for observability
/// (spec §4.2: "Each exposes a debug snapshot of its latest tick").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct TickSummary {
    pub loop_name: &'static str,
    pub ticked_at: i64,
    pub actions_applied: usize,
    pub suppressed: Vec<String>,
}

#[async_trait]
pub trait WatchdogLoop: Send + Sync {
    fn name(&self) -> &'static str;
    async fn tick(&self, force: bool) -> TickSummary;
}

/// Validates an activity timestamp per spec §4.2 "Timestamp sanity":
/// rejects negatives, clamps future timestamps to `now`, and rejects
/// anything stale for longer than the plausible-staleness ceiling.
pub fn sanitize_timestamp(now: i64, ts: i64) -> Option<i64> {
    if ts < 0 {
        return None;
    }
    let clamped = if ts > now + crate::constants::FUTURE_CLAMP_SECS * 1000 { now } else { ts };
    let staleness_days = (now - clamped) / 86_400_000;
    if staleness_days > crate::constants::MAX_PLAUSIBLE_STALENESS_DAYS {
        warn!(ts, staleness_days, "activity timestamp rejected as implausibly stale");
        return None;
    }
    Some(clamped)
}

/// Interprets `review_last_activity_at` as seconds or milliseconds using the
/// heuristic preserved from the richer original behavior (spec §9): values
/// below the boundary are assumed to be seconds.
pub fn normalize_maybe_seconds(value: i64) -> i64 {
    if value < crate::constants::SECONDS_VS_MILLIS_HEURISTIC_BOUNDARY {
        value * 1000
    } else {
        value
    }
}

pub fn in_quiet_hours(config: &QuietHoursConfig, now_ms: i64) -> bool {
    if !config.enabled {
        return false;
    }
    let tz: Tz = config.timezone.parse().unwrap_or(chrono_tz::UTC);
    let Some(utc) = chrono::Utc.timestamp_millis_opt(now_ms).single() else {
        return false;
    };
    let hour = utc.with_timezone(&tz).hour();
    if config.start_hour <= config.end_hour {
        hour >= config.start_hour && hour < config.end_hour
    } else {
        hour >= config.start_hour || hour < config.end_hour
    }
}

/// Per-agent alert cooldown shared across loops (spec §4.2 "Cooldown").
#[derive(Default)]
pub struct CooldownTracker {
    last_alert_ms: Mutex<HashMap<String, i64>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn ready(&self, key: &str, now_ms: i64, cooldown_min: i64) -> bool {
        let mut last = self.last_alert_ms.lock().await;
        match last.get(key) {
            Some(prev) if now_ms - prev < cooldown_min * 60_000 => false,
            _ => {
                last.insert(key.to_string(), now_ms);
                true
            }
        }
    }
}

/// State-fingerprint debounce for ready-queue warnings (spec §4.2):
/// suppresses a repeat alert for an agent whose `(readyCount, todoCount,
/// sortedBlockedIds, doingCount, validatingCount)` tuple is unchanged.
#[derive(Default)]
pub struct FingerprintTracker {
    last: Mutex<HashMap<String, String>>,
}

impl FingerprintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn changed(&self, key: &str, fingerprint: String) -> bool {
        let mut last = self.last.lock().await;
        let changed = last.get(key) != Some(&fingerprint);
        last.insert(key.to_string(), fingerprint);
        changed
    }
}

/// Drives every registered loop on its own `tokio::time::interval`,
/// recording a liveness tick via `compliance` regardless of whether any
/// loop applied an action (spec §4.2 "record a durable last tick marker").
pub struct Scheduler {
    clock: Arc<dyn Clock>,
    board_health: BoardHealthConfig,
    quiet_hours: QuietHoursConfig,
    last_tick_ms: Mutex<Option<i64>>,
    loops: Vec<Arc<dyn WatchdogLoop>>,
    last_summaries: Mutex<HashMap<&'static str, TickSummary>>,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, board_health: BoardHealthConfig, quiet_hours: QuietHoursConfig, loops: Vec<Arc<dyn WatchdogLoop>>) -> Self {
        Self {
            clock,
            board_health,
            quiet_hours,
            last_tick_ms: Mutex::new(None),
            loops,
            last_summaries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn tick_all(&self, force: bool) {
        let now = self.clock.now_ms();
        *self.last_tick_ms.lock().await = Some(now);

        if !self.board_health.enabled {
            return;
        }
        if !force && in_quiet_hours(&self.quiet_hours, now) {
            info!("watchdog tick suppressed: quiet hours");
            return;
        }

        for wl in &self.loops {
            let summary = wl.tick(force).await;
            info!(loop_name = wl.name(), actions = summary.actions_applied, "watchdog loop ticked");
            self.last_summaries.lock().await.insert(wl.name(), summary);
        }
    }

    pub async fn last_tick_ms(&self) -> Option<i64> {
        *self.last_tick_ms.lock().await
    }

    pub async fn last_summary(&self, name: &str) -> Option<TickSummary> {
        self.last_summaries.lock().await.get(name).cloned()
    }

    pub async fn all_summaries(&self) -> Vec<TickSummary> {
        self.last_summaries.lock().await.values().cloned().collect()
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(self.board_health.interval_ms));
        loop {
            interval.tick().await;
            self.tick_all(false).await;
        }
    }
}
