//! Outbound notifications for todo lifecycle events.

use async_trait::async_trait;
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

use crate::todo::Todo;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationMessage {
    pub event_type: String,
    pub todo_id: i64,
    pub title: String,
    pub message: String,
    pub timestamp: u64,
}

impl NotificationMessage {
    pub fn todo_completed(todo: &Todo) -> Self {
        Self {
            event_type: "todo_completed".to_string(),
            todo_id: todo.id,
            title: todo.title.clone(),
            message: format!("Congratulations! You completed '{}'!", todo.title),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to deliver notification: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: NotificationMessage) -> Result<(), NotifyError>;
}

/// Emits notifications as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: NotificationMessage) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(&message)?;
        info!(
            target: "turnstile::notification",
            event_type = %message.event_type,
            todo_id = message.todo_id,
            payload = %payload,
            "Notification dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn todo() -> Todo {
        Todo {
            id: 9,
            title: "file taxes".to_string(),
            description: String::new(),
            completed: true,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_completed_message() {
        let message = NotificationMessage::todo_completed(&todo());
        assert_eq!(message.event_type, "todo_completed");
        assert_eq!(message.todo_id, 9);
        assert!(message.message.contains("file taxes"));

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["event_type"], "todo_completed");
        assert_eq!(json["todo_id"], 9);
    }

    #[tokio::test]
    async fn test_log_notifier_accepts_message() {
        let result = LogNotifier
            .send(NotificationMessage::todo_completed(&todo()))
            .await;
        assert!(result.is_ok());
    }
}
