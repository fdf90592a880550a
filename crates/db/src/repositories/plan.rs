use sqlx::{sqlite::SqliteRow, Row};
use tempra_core::errors::ProviderError;
use tempra_core::providers::{GoalPlan, PlanStore};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlPlanStore {
    pool: DbPool,
}

impl SqlPlanStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, plan: &GoalPlan) -> Result<(), RepositoryError> {
        let subtasks_json = encode_json("subtasks_json", &plan.subtasks)?;
        let weeks_json = encode_json("weeks_json", &plan.weeks)?;

        sqlx::query(
            "INSERT INTO goal_plan (
                id,
                user_id,
                goal,
                duration_weeks,
                build_around_calendar,
                subtasks_json,
                weeks_json,
                created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                goal = excluded.goal,
                duration_weeks = excluded.duration_weeks,
                build_around_calendar = excluded.build_around_calendar,
                subtasks_json = excluded.subtasks_json,
                weeks_json = excluded.weeks_json",
        )
        .bind(&plan.id)
        .bind(&plan.user_id)
        .bind(&plan.goal)
        .bind(i64::from(plan.duration_weeks))
        .bind(plan.build_around_calendar)
        .bind(subtasks_json)
        .bind(weeks_json)
        .bind(plan.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn select_for_user(&self, user_id: &str) -> Result<Vec<GoalPlan>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                user_id,
                goal,
                duration_weeks,
                build_around_calendar,
                subtasks_json,
                weeks_json,
                created_at
             FROM goal_plan
             WHERE user_id = ?
             ORDER BY created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(plan_from_row).collect()
    }
}

#[async_trait::async_trait]
impl PlanStore for SqlPlanStore {
    async fn save_plan(&self, plan: GoalPlan) -> Result<(), ProviderError> {
        Ok(self.upsert(&plan).await?)
    }

    async fn list_plans(&self, user_id: &str) -> Result<Vec<GoalPlan>, ProviderError> {
        Ok(self.select_for_user(user_id).await?)
    }
}

fn encode_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("cannot encode `{column}`: {error}")))
}

fn decode_json<T: serde::de::DeserializeOwned>(column: &str, value: String) -> Result<T, RepositoryError> {
    serde_json::from_str(&value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

fn plan_from_row(row: SqliteRow) -> Result<GoalPlan, RepositoryError> {
    let duration_weeks: i64 = row.try_get("duration_weeks")?;
    let duration_weeks = u32::try_from(duration_weeks).map_err(|_| {
        RepositoryError::Decode(format!("invalid `duration_weeks`: {duration_weeks}"))
    })?;

    Ok(GoalPlan {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        goal: row.try_get("goal")?,
        duration_weeks,
        build_around_calendar: row.try_get("build_around_calendar")?,
        subtasks: decode_json("subtasks_json", row.try_get("subtasks_json")?)?,
        weeks: decode_json("weeks_json", row.try_get("weeks_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
