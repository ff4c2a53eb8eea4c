//! Notification dispatch: condition matching and fan-out to channels.

pub mod condition;
pub mod dispatcher;

pub use condition::{condition_matches, EventMetrics};
pub use dispatcher::{DispatchReport, NotificationDispatcher};
