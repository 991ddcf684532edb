// src/db/enrollment_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::enrollment::{ClassSession, Enrollment},
};

const ENROLLMENT_COLUMNS: &str = r#"
    id, tenant_id, branch_id, client_id, class_id, membership_id, status, effective_from, effective_to
"#;

#[derive(Clone, Default)]
pub struct EnrollmentRepository;

impl EnrollmentRepository {
    pub fn new() -> Self {
        Self
    }

    /// Contagem exata de matrículas ativas na turma em `date`.
    pub async fn count_active_on<'e, E>(&self, executor: E, class_id: Uuid, date: NaiveDate) -> Result<i64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM enrollments
            WHERE class_id = $1
              AND status = 'active'
              AND effective_from <= $2
              AND (effective_to IS NULL OR effective_to >= $2)
            "#,
        )
        .bind(class_id)
        .bind(date)
        .fetch_one(executor)
        .await?;

        Ok(count)
    }

    /// Todas as matrículas das turmas (carregadas uma vez por recontagem).
    pub async fn list_for_classes<'e, E>(&self, executor: E, class_ids: &[Uuid]) -> Result<Vec<Enrollment>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        if class_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE class_id = ANY($1)");
        let rows = sqlx::query_as::<_, Enrollment>(&sql)
            .bind(class_ids)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    /// Sessões datadas em `[from, to]`, opcionalmente restritas a um conjunto de turmas.
    pub async fn list_sessions<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Option<Uuid>,
        from: NaiveDate,
        to: NaiveDate,
        class_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ClassSession>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sessions = sqlx::query_as::<_, ClassSession>(
            r#"
            SELECT id, class_id, session_date, enrolled_count
            FROM class_sessions
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR branch_id = $2)
              AND session_date BETWEEN $3 AND $4
              AND ($5::uuid[] IS NULL OR class_id = ANY($5))
            ORDER BY class_id, session_date
            "#,
        )
        .bind(tenant_id)
        .bind(branch_id)
        .bind(from)
        .bind(to)
        .bind(class_ids)
        .fetch_all(executor)
        .await?;

        Ok(sessions)
    }

    /// Sessões de uma turma dentro de uma janela (aberta à direita quando `to` é None).
    pub async fn list_class_sessions_in_window<'e, E>(
        &self,
        executor: E,
        class_id: Uuid,
        from: NaiveDate,
        to: Option<NaiveDate>,
    ) -> Result<Vec<ClassSession>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sessions = sqlx::query_as::<_, ClassSession>(
            r#"
            SELECT id, class_id, session_date, enrolled_count
            FROM class_sessions
            WHERE class_id = $1
              AND session_date >= $2
              AND ($3::date IS NULL OR session_date <= $3)
            ORDER BY session_date
            "#,
        )
        .bind(class_id)
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await?;

        Ok(sessions)
    }

    pub async fn class_ids_for_plan<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        plan_id: Uuid,
    ) -> Result<Option<Vec<Uuid>>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let ids = sqlx::query_scalar::<_, Vec<Uuid>>("SELECT class_ids FROM plans WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(plan_id)
            .fetch_optional(executor)
            .await?;

        Ok(ids)
    }

    /// Inativa as matrículas vinculadas a um contrato, encerrando a vigência em `until`.
    /// O gatilho do feed de alterações cuida de decrementar as contagens.
    pub async fn deactivate_for_membership<'e, E>(
        &self,
        executor: E,
        membership_id: Uuid,
        until: NaiveDate,
    ) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE enrollments
            SET status = 'inactive',
                effective_to = LEAST(COALESCE(effective_to, $2), $2)
            WHERE membership_id = $1 AND status = 'active'
            "#,
        )
        .bind(membership_id)
        .bind(until)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }
}
