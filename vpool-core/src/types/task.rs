//! Background task domain types.

use serde::{Deserialize, Serialize};

/// Status of a background task. Only moves forward: running → finished | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Running,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a background task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Decimal id, allocated in increasing order
    pub id: String,

    /// Resource the task works on (e.g. `/storagepools/isos`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    pub status: TaskStatus,

    /// Latest progress or failure message
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Finished.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert_eq!(TaskStatus::default(), TaskStatus::Running);
    }

    #[test]
    fn test_task_json_shape() {
        let task = Task {
            id: "2".to_string(),
            target: None,
            status: TaskStatus::Failed,
            message: "boom".to_string(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["message"], "boom");
        assert!(json.get("target").is_none());
    }
}
