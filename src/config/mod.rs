use crate::constants;
use serde::{Deserialize, Serialize};
use std::env;

/// Runtime configuration, loaded once at startup from the environment (spec §6.3).
///
/// Every field here corresponds to a named environment variable in spec.md
/// §6.3; unset variables fall back to the defaults in `constants.rs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub board_health: BoardHealthConfig,
    pub quiet_hours: QuietHoursConfig,
    pub workspace: WorkspaceConfig,
    pub bridge: BridgeConfig,
    pub production: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardHealthConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub stale_doing_min: i64,
    pub suggest_close_min: i64,
    pub rollback_window_ms: u64,
    pub digest_interval_ms: u64,
    pub digest_channel: String,
    pub dry_run: bool,
    pub max_actions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHoursConfig {
    pub enabled: bool,
    pub start_hour: u32,
    pub end_hour: u32,
    pub timezone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    pub workspace_root: Option<String>,
    pub shared_workspace_root: Option<String>,
    pub state_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub feature_families: Vec<String>,
    pub auto_create_severities: Vec<String>,
    pub guardrail_enabled: bool,
    pub require_non_author_reviewer: bool,
    pub default_reviewer: Option<String>,
    pub escalation_target: String,
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match env::var(key) {
        Ok(v) => v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect(),
        Err(_) => default.iter().map(|s| s.to_string()).collect(),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => v.to_lowercase() != "false",
        Err(_) => default,
    }
}

impl Config {
    /// Loads configuration from the process environment. Never fails: every
    /// recognized variable has a safe default, matching the degrade-gracefully
    /// posture the rest of the system takes toward misconfiguration (spec §7).
    pub fn load() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("no .env file loaded: {e}");
        }

        let production = env_or("NODE_ENV", "development") == "production";

        let api = ApiConfig {
            host: env_or("API_HOST", "127.0.0.1"),
            port: env_parse("API_PORT", 3000u16),
        };

        let board_health = BoardHealthConfig {
            enabled: env_bool("BOARD_HEALTH_ENABLED", true),
            interval_ms: env_parse(
                "BOARD_HEALTH_INTERVAL_MS",
                constants::DEFAULT_BOARD_HEALTH_INTERVAL_MS,
            ),
            stale_doing_min: env_parse(
                "BOARD_HEALTH_STALE_DOING_MIN",
                constants::DEFAULT_STALE_DOING_THRESHOLD_MIN,
            ),
            suggest_close_min: env_parse(
                "BOARD_HEALTH_SUGGEST_CLOSE_MIN",
                constants::DEFAULT_SUGGEST_CLOSE_THRESHOLD_MIN,
            ),
            rollback_window_ms: env_parse(
                "BOARD_HEALTH_ROLLBACK_WINDOW_MS",
                constants::DEFAULT_ROLLBACK_WINDOW_MS,
            ),
            digest_interval_ms: env_parse(
                "BOARD_HEALTH_DIGEST_INTERVAL_MS",
                constants::DEFAULT_DIGEST_INTERVAL_MS,
            ),
            digest_channel: env_or(
                "BOARD_HEALTH_DIGEST_CHANNEL",
                constants::DEFAULT_DIGEST_CHANNEL,
            ),
            dry_run: env_bool("BOARD_HEALTH_DRY_RUN", false),
            max_actions: env_parse(
                "BOARD_HEALTH_MAX_ACTIONS",
                constants::DEFAULT_MAX_ACTIONS_PER_TICK,
            ),
        };

        let quiet_hours = QuietHoursConfig {
            enabled: env_bool("WATCHDOG_QUIET_HOURS_ENABLED", false),
            start_hour: env_parse("WATCHDOG_QUIET_HOURS_START_HOUR", 22u32),
            end_hour: env_parse("WATCHDOG_QUIET_HOURS_END_HOUR", 7u32),
            timezone: env_or("WATCHDOG_QUIET_HOURS_TZ", "UTC"),
        };

        let workspace = WorkspaceConfig {
            workspace_root: env::var("REFLECTT_WORKSPACE").ok(),
            shared_workspace_root: env::var("REFLECTT_SHARED_WORKSPACE").ok(),
            state_dir: env::var("OPENCLAW_STATE_DIR").ok(),
        };

        let bridge = BridgeConfig {
            feature_families: env_list("BRIDGE_FEATURE_FAMILIES", constants::DEFAULT_FEATURE_FAMILIES),
            auto_create_severities: env_list("BRIDGE_AUTO_CREATE_SEVERITIES", constants::DEFAULT_AUTO_CREATE_SEVERITIES),
            guardrail_enabled: env_bool("BRIDGE_GUARDRAIL_ENABLED", true),
            require_non_author_reviewer: env_bool("BRIDGE_REQUIRE_NON_AUTHOR_REVIEWER", true),
            default_reviewer: env::var("BRIDGE_DEFAULT_REVIEWER").ok(),
            escalation_target: env_or("BRIDGE_ESCALATION_TARGET", "kai"),
        };

        Config {
            api,
            board_health,
            quiet_hours,
            workspace,
            bridge,
            production,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::load()
    }
}
