// src/db/job_repo.rs

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::common::error::AppError;

#[derive(Clone, Default)]
pub struct JobRunRepository;

impl JobRunRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn start<'e, E>(&self, executor: E, job: &str, started_at: DateTime<Utc>) -> Result<Uuid, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO job_runs (job, started_at, status) VALUES ($1, $2, 'running') RETURNING id",
        )
        .bind(job)
        .bind(started_at)
        .fetch_one(executor)
        .await?;

        Ok(id)
    }

    pub async fn finish<'e, E>(
        &self,
        executor: E,
        run_id: Uuid,
        status: &str,
        summary: Option<Value>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE job_runs SET finished_at = NOW(), status = $2, summary = $3 WHERE id = $1")
            .bind(run_id)
            .bind(status)
            .bind(summary)
            .execute(executor)
            .await?;

        Ok(())
    }
}
