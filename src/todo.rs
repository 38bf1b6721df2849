//! Todo records and their persistence port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTodoRequest {
    #[validate(length(min = 1, max = 255, message = "title is required"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTodoRequest {
    #[validate(length(min = 1, max = 255))]
    pub title: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub completed: Option<bool>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("todo not found")]
    NotFound,
}

#[async_trait]
pub trait TodoRepository: Send + Sync {
    async fn create(&self, title: String, description: String) -> Result<Todo, RepositoryError>;
    async fn list(&self) -> Result<Vec<Todo>, RepositoryError>;
    async fn get(&self, id: i64) -> Result<Todo, RepositoryError>;
    async fn update(&self, id: i64, changes: UpdateTodoRequest) -> Result<Todo, RepositoryError>;
    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}

#[derive(Debug, Default)]
struct TodoTable {
    next_id: i64,
    rows: BTreeMap<i64, Todo>,
}

/// Process-local repository.
#[derive(Debug, Default)]
pub struct InMemoryTodoRepository {
    table: RwLock<TodoTable>,
}

impl InMemoryTodoRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[async_trait]
impl TodoRepository for InMemoryTodoRepository {
    async fn create(&self, title: String, description: String) -> Result<Todo, RepositoryError> {
        let mut table = self.table.write().await;
        table.next_id += 1;

        let now = now_secs();
        let todo = Todo {
            id: table.next_id,
            title,
            description,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(todo.id, todo.clone());
        Ok(todo)
    }

    async fn list(&self) -> Result<Vec<Todo>, RepositoryError> {
        Ok(self.table.read().await.rows.values().cloned().collect())
    }

    async fn get(&self, id: i64) -> Result<Todo, RepositoryError> {
        self.table
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound)
    }

    async fn update(&self, id: i64, changes: UpdateTodoRequest) -> Result<Todo, RepositoryError> {
        let mut table = self.table.write().await;
        let todo = table.rows.get_mut(&id).ok_or(RepositoryError::NotFound)?;

        if let Some(title) = changes.title {
            todo.title = title;
        }
        if let Some(description) = changes.description {
            todo.description = description;
        }
        if let Some(completed) = changes.completed {
            todo.completed = completed;
        }
        todo.updated_at = now_secs();

        Ok(todo.clone())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        self.table
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let repo = InMemoryTodoRepository::new();

        let first = repo.create("write docs".into(), String::new()).await.unwrap();
        let second = repo.create("ship".into(), "v1".into()).await.unwrap();
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert!(!first.completed);

        let updated = repo
            .update(
                first.id,
                UpdateTodoRequest {
                    completed: Some(true),
                    ..UpdateTodoRequest::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.completed);
        assert_eq!(updated.title, "write docs");

        repo.delete(second.id).await.unwrap();
        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
    }

    #[tokio::test]
    async fn test_missing_todo() {
        let repo = InMemoryTodoRepository::new();

        assert_eq!(repo.get(7).await, Err(RepositoryError::NotFound));
        assert_eq!(repo.delete(7).await, Err(RepositoryError::NotFound));
        assert_eq!(
            repo.update(7, UpdateTodoRequest::default()).await,
            Err(RepositoryError::NotFound)
        );
    }

    #[test]
    fn test_create_request_validation() {
        let ok = CreateTodoRequest {
            title: "title".into(),
            description: "desc".into(),
        };
        assert!(ok.validate().is_ok());

        let empty = CreateTodoRequest {
            title: String::new(),
            description: String::new(),
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_update_request_validation() {
        let blank_title = UpdateTodoRequest {
            title: Some(String::new()),
            ..UpdateTodoRequest::default()
        };
        assert!(blank_title.validate().is_err());
        assert!(UpdateTodoRequest::default().validate().is_ok());
    }
}
