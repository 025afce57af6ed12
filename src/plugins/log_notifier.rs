//! Built-in `log` notifier: events become structured log records.

use tracing::{info, warn};

use super::{Notifier, PluginFuture};
use crate::models::event::{EventPriority, OrchestratorEvent};

/// Registry name.
pub const NAME: &str = "log";

/// Writes each event through `tracing`.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        NAME
    }

    fn notify<'a>(&'a self, event: &'a OrchestratorEvent) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            match event.priority {
                EventPriority::Urgent | EventPriority::Warning => warn!(
                    event_type = event.event_type,
                    priority = %event.priority,
                    session_id = event.session_id,
                    project_id = event.project_id,
                    "{}",
                    event.message
                ),
                EventPriority::Action | EventPriority::Info => info!(
                    event_type = event.event_type,
                    priority = %event.priority,
                    session_id = event.session_id,
                    project_id = event.project_id,
                    "{}",
                    event.message
                ),
            }
            Ok(())
        })
    }
}
