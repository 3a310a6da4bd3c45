pub mod approval;
pub mod routing;

pub use approval::{ApprovalDetector, ApprovalListener, SkipReason};
pub use routing::{route_message, MessageCategory, RouteRequest, RoutedMessage};
