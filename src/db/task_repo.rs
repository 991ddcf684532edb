// src/db/task_repo.rs

use std::collections::HashSet;

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::common::error::AppError;

#[derive(Clone, Default)]
pub struct TaskRepository;

impl TaskRepository {
    pub fn new() -> Self {
        Self
    }

    /// IDs das tarefas já existentes na unidade para o dia.
    pub async fn existing_ids_for_day<'e, E>(
        &self,
        executor: E,
        branch_id: Uuid,
        date: NaiveDate,
    ) -> Result<HashSet<String>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let ids = sqlx::query_scalar::<_, String>("SELECT id FROM tasks WHERE branch_id = $1 AND date_key = $2")
            .bind(branch_id)
            .bind(date)
            .fetch_all(executor)
            .await?;

        Ok(ids.into_iter().collect())
    }
}
