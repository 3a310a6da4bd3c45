//! System-wide default values for watchdog thresholds, caps, and bus sizing.
//! Overridable via the environment variables in `config::Config::load` (spec §6.3).

/// Event bus bounded history size (spec §4.5: "cap ≈ 5000; oldest dropped").
pub const EVENT_HISTORY_CAP: usize = 5000;

/// Default SSE batch flush window (spec §4.5).
pub const DEFAULT_BATCH_WINDOW_MS: u64 = 250;

/// Default watchdog scheduler tick interval.
pub const DEFAULT_BOARD_HEALTH_INTERVAL_MS: u64 = 60_000;

/// `auto-block-stale`: minutes of no effective activity in `doing` before auto-block.
pub const DEFAULT_STALE_DOING_THRESHOLD_MIN: i64 = 240;

/// `suggest-close`: minutes of no activity in blocked/todo before a close suggestion.
pub const DEFAULT_SUGGEST_CLOSE_THRESHOLD_MIN: i64 = 10_080; // 7 days

/// Rollback window for reversible watchdog actions.
pub const DEFAULT_ROLLBACK_WINDOW_MS: u64 = 3_600_000; // 1 hour

/// `digest-emitted`: minimum interval between digests.
pub const DEFAULT_DIGEST_INTERVAL_MS: u64 = 21_600_000; // 6 hours

/// Default digest/alert channel.
pub const DEFAULT_DIGEST_CHANNEL: &str = "board-digest";

/// Default channel for watchdog alerts and escalations.
pub const DEFAULT_ALERT_CHANNEL: &str = "watchdog-alerts";

/// Channel comments get fanned out to when referencing other tasks.
pub const TASK_COMMENTS_CHANNEL: &str = "task-comments";

/// Maximum actions a single watchdog tick may apply (rate cap).
pub const DEFAULT_MAX_ACTIONS_PER_TICK: usize = 25;

/// review-reassign: hours of no reviewer activity before reassignment is considered.
pub const DEFAULT_REVIEW_SLA_THRESHOLD_MIN: i64 = 480; // 8 hours

/// Per-agent alert cooldown.
pub const DEFAULT_COOLDOWN_MIN: i64 = 30;

/// ready-queue-warning floor: minimum unblocked todo tasks per agent before warning.
pub const DEFAULT_READY_FLOOR: usize = 1;

/// idle-queue-escalation: minutes of continuous idle before escalation.
pub const DEFAULT_ESCALATE_AFTER_MIN: i64 = 120;

/// Agents with no presence update in this long are excluded from ready-queue-replenish.
pub const DEFAULT_INACTIVE_AGENT_THRESHOLD_MIN: i64 = 60;

/// "Active" presence window used by reviewer reassignment (spec §4.4: "seen in last hour").
pub const PRESENCE_ACTIVE_WINDOW_MIN: i64 = 60;

/// Fine-grained loop cadence (idle-nudge, cadence, mention-rescue).
pub const DEFAULT_FINE_GRAINED_CADENCE_SECS: u64 = 45;

/// Mention-ack sweep threshold before a mention-rescue nudge fires.
pub const DEFAULT_MENTION_RESCUE_THRESHOLD_MIN: i64 = 30;

/// Timestamp sanity: reject anything stale-for-longer-than this as a likely bug.
pub const MAX_PLAUSIBLE_STALENESS_DAYS: i64 = 30;

/// Timestamp sanity: clamp future timestamps beyond now + this many seconds.
pub const FUTURE_CLAMP_SECS: i64 = 60;

/// Minimum prefix length accepted by `resolveTaskId` prefix matching.
pub const MIN_PREFIX_LEN: usize = 6;

/// Maximum number of suggestions returned for an ambiguous prefix.
pub const MAX_PREFIX_SUGGESTIONS: usize = 5;

/// Default per-role WIP cap when the role registry does not specify one.
pub const DEFAULT_WIP_CAP: usize = 3;

/// Hours after entering `done` before the outcome checkpoint comes due.
pub const OUTCOME_CHECKPOINT_DUE_HOURS: i64 = 48;

/// Heuristic boundary for `review_last_activity_at` unit detection (spec §9):
/// values below this are assumed to be seconds, not milliseconds.
pub const SECONDS_VS_MILLIS_HEURISTIC_BOUNDARY: i64 = 100_000_000_000;

/// Feature-family set routed to `pending_triage` instead of auto-created (spec §4.3).
pub const DEFAULT_FEATURE_FAMILIES: &[&str] = &[
    "autonomy",
    "revenue-focus",
    "monetization",
    "product-is-process",
    "focus-correction",
    "autonomy-contract",
    "burn-rate",
];

/// Severities that auto-create a task from a promoted insight (spec §4.3).
pub const DEFAULT_AUTO_CREATE_SEVERITIES: &[&str] = &["high", "critical"];

/// Author-exclusion guardrail affinity-ratio threshold (spec §4.4).
pub const GUARDRAIL_RATIO_THRESHOLD: f64 = 1.5;

/// Author-exclusion guardrail affinity-delta threshold (spec §4.4).
pub const GUARDRAIL_DELTA_THRESHOLD: f64 = 0.2;
