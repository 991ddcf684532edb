// src/db/attendance_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::attendance::AttendanceMark};

#[derive(Clone, Default)]
pub struct AttendanceRepository;

impl AttendanceRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn list_for_day<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AttendanceMark>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let marks = sqlx::query_as::<_, AttendanceMark>(
            r#"
            SELECT id, tenant_id, branch_id, client_id, session_id, attendance_date, hour, present
            FROM attendances
            WHERE tenant_id = $1 AND branch_id = $2 AND attendance_date = $3
            "#,
        )
        .bind(tenant_id)
        .bind(branch_id)
        .bind(date)
        .fetch_all(executor)
        .await?;

        Ok(marks)
    }
}
