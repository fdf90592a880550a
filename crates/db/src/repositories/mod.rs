use chrono::{DateTime, FixedOffset, Utc};
use tempra_core::errors::ProviderError;
use thiserror::Error;

pub mod memory;
pub mod plan;
pub mod todo;

pub use memory::{InMemoryPlanStore, InMemoryTodoStore};
pub use plan::SqlPlanStore;
pub use todo::SqlTodoStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for ProviderError {
    fn from(error: RepositoryError) -> Self {
        ProviderError::Failed(error.to_string())
    }
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    parse_offset_timestamp(column, value).map(|timestamp| timestamp.with_timezone(&Utc))
}

pub(crate) fn parse_offset_timestamp(
    column: &str,
    value: String,
) -> Result<DateTime<FixedOffset>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map_err(|error| {
        RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
    })
}
