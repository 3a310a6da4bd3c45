//! `routeMessage`: channel selection and @mention prefix injection for
//! watchdog-originated notifications (spec §4.6).

use crate::constants::{DEFAULT_ALERT_CHANNEL, DEFAULT_DIGEST_CHANNEL, TASK_COMMENTS_CHANNEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageCategory {
    WatchdogAlert,
    Escalation,
    Digest,
    SystemInfo,
    StatusUpdate,
}

#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub from: String,
    pub content: String,
    pub category: MessageCategory,
    pub severity: Option<String>,
    pub task_id: Option<String>,
    pub mentions: Vec<String>,
    pub force_channel: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RoutedMessage {
    pub channel: String,
    pub content: String,
}

fn default_channel(category: MessageCategory, task_id: &Option<String>) -> String {
    match category {
        MessageCategory::WatchdogAlert | MessageCategory::Escalation => DEFAULT_ALERT_CHANNEL.to_string(),
        MessageCategory::Digest => DEFAULT_DIGEST_CHANNEL.to_string(),
        MessageCategory::SystemInfo => "system-info".to_string(),
        MessageCategory::StatusUpdate => task_id.clone().map(|_| TASK_COMMENTS_CHANNEL.to_string()).unwrap_or_else(|| "general".to_string()),
    }
}

/// Picks a channel by category and prefixes content with any `mentions` not
/// already present as `@name` in the body.
pub fn route_message(req: RouteRequest) -> RoutedMessage {
    let channel = req.force_channel.clone().unwrap_or_else(|| default_channel(req.category, &req.task_id));

    let missing: Vec<&String> = req
        .mentions
        .iter()
        .filter(|name| !req.content.to_lowercase().contains(&format!("@{}", name.to_lowercase())))
        .collect();

    let content = if missing.is_empty() {
        req.content
    } else {
        let prefix = missing.iter().map(|n| format!("@{n}")).collect::<Vec<_>>().join(" ");
        format!("{prefix} {}", req.content)
    };

    RoutedMessage { channel, content }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watchdog_alert_routes_to_alert_channel() {
        let routed = route_message(RouteRequest {
            from: "system".into(),
            content: "task stale".into(),
            category: MessageCategory::WatchdogAlert,
            severity: None,
            task_id: None,
            mentions: vec!["link".into()],
            force_channel: None,
        });
        assert_eq!(routed.channel, DEFAULT_ALERT_CHANNEL);
        assert!(routed.content.starts_with("@link"));
    }

    #[test]
    fn existing_mention_is_not_duplicated() {
        let routed = route_message(RouteRequest {
            from: "system".into(),
            content: "@link please check".into(),
            category: MessageCategory::WatchdogAlert,
            severity: None,
            task_id: None,
            mentions: vec!["link".into()],
            force_channel: None,
        });
        assert_eq!(routed.content, "@link please check");
    }
}
