use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long the host should keep a toast on screen before auto-dismissing.
pub const DEFAULT_DISPLAY_MS: u64 = 6_000;

/// Transient notice shown by the host when the poller spots newly assigned
/// work. Dismissal (timeout or click) is the host's job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub suggested_duration_ms: u64,
}

impl Notification {
    pub fn new_task(task_name: &str) -> Self {
        Self {
            message: format!("New task assigned: {task_name}"),
            suggested_duration_ms: DEFAULT_DISPLAY_MS,
        }
    }

    pub fn suggested_duration(&self) -> Duration {
        Duration::from_millis(self.suggested_duration_ms)
    }
}

/// Host-side display adapters implement this trait.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}
