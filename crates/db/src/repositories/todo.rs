use chrono::NaiveDate;
use sqlx::{sqlite::SqliteRow, Row};
use tempra_core::errors::ProviderError;
use tempra_core::providers::{NewTodo, TodoItem, TodoKind, TodoQuery, TodoStore};

use super::{parse_offset_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqlTodoStore {
    pool: DbPool,
}

impl SqlTodoStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, item: &TodoItem) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO todo_item (
                id,
                user_id,
                title,
                due_date,
                remind_at,
                kind,
                completed,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.user_id)
        .bind(&item.title)
        .bind(item.due_date.map(|date| date.format(DATE_FORMAT).to_string()))
        .bind(item.remind_at.map(|at| at.to_rfc3339()))
        .bind(item.kind.as_str())
        .bind(item.completed)
        .bind(item.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn select(&self, user_id: &str, query: &TodoQuery) -> Result<Vec<TodoItem>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                title,
                due_date,
                remind_at,
                kind,
                completed,
                created_at
             FROM todo_item
             WHERE user_id = ?
               AND (? OR completed = 0)
               AND (? IS NULL OR kind = ?)
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .bind(query.include_completed)
        .bind(query.kind.map(TodoKind::as_str))
        .bind(query.kind.map(TodoKind::as_str))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(todo_from_row).collect()
    }
}

#[async_trait::async_trait]
impl TodoStore for SqlTodoStore {
    async fn append(&self, todo: NewTodo) -> Result<TodoItem, ProviderError> {
        let item = TodoItem::from_new(todo);
        self.insert(&item).await?;
        Ok(item)
    }

    async fn query(&self, user_id: &str, query: TodoQuery) -> Result<Vec<TodoItem>, ProviderError> {
        Ok(self.select(user_id, &query).await?)
    }
}

fn todo_from_row(row: SqliteRow) -> Result<TodoItem, RepositoryError> {
    let due_date = row
        .try_get::<Option<String>, _>("due_date")?
        .map(|value| {
            NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|error| {
                RepositoryError::Decode(format!("invalid date in `due_date`: `{value}` ({error})"))
            })
        })
        .transpose()?;
    let remind_at = row
        .try_get::<Option<String>, _>("remind_at")?
        .map(|value| parse_offset_timestamp("remind_at", value))
        .transpose()?;

    Ok(TodoItem {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        due_date,
        remind_at,
        kind: parse_kind(row.try_get("kind")?)?,
        completed: row.try_get("completed")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn parse_kind(value: String) -> Result<TodoKind, RepositoryError> {
    match value.as_str() {
        "task" => Ok(TodoKind::Task),
        "reminder" => Ok(TodoKind::Reminder),
        _ => Err(RepositoryError::Decode(format!("unknown todo kind `{value}`"))),
    }
}
