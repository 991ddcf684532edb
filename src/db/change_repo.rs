// src/db/change_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::change::EntityChange};

#[derive(Clone, Default)]
pub struct ChangeRepository;

impl ChangeRepository {
    pub fn new() -> Self {
        Self
    }

    /// Eventos ainda não processados depois de `after_id`, em ordem de chegada.
    pub async fn list_pending<'e, E>(
        &self,
        executor: E,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<EntityChange>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let changes = sqlx::query_as::<_, EntityChange>(
            r#"
            SELECT id, event_id, entity, entity_id, before, after, created_at, attempts
            FROM entity_changes
            WHERE processed_at IS NULL AND id > $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after_id)
        .bind(limit)
        .fetch_all(executor)
        .await?;

        Ok(changes)
    }

    /// Reivindica o evento marcando-o como processado. Deve rodar na mesma
    /// transação dos efeitos: `false` significa que outro worker já o aplicou.
    pub async fn claim<'e, E>(&self, executor: E, change_id: i64) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            "UPDATE entity_changes SET processed_at = NOW(), last_error = NULL WHERE id = $1 AND processed_at IS NULL",
        )
        .bind(change_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Reivindica as presenças pendentes que tocam `(branch_id, date)` em qualquer
    /// um dos lados. Devolve os eventos para que a parte fora do dia seja aplicada.
    pub async fn claim_attendance_for_day<'e, E>(
        &self,
        executor: E,
        branch_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<EntityChange>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let claimed = sqlx::query_as::<_, EntityChange>(
            r#"
            UPDATE entity_changes
            SET processed_at = NOW(), last_error = NULL
            WHERE entity = 'attendance'
              AND processed_at IS NULL
              AND (
                    ((before->>'branch_id')::uuid = $1 AND (before->>'attendance_date')::date = $2)
                 OR ((after->>'branch_id')::uuid = $1 AND (after->>'attendance_date')::date = $2)
              )
            RETURNING id, event_id, entity, entity_id, before, after, created_at, attempts
            "#,
        )
        .bind(branch_id)
        .bind(date)
        .fetch_all(executor)
        .await?;

        Ok(claimed)
    }

    /// Evento impossível de interpretar: fica registrado com o erro e sai da fila.
    pub async fn mark_rejected<'e, E>(&self, executor: E, change_id: i64, error: &str) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE entity_changes SET processed_at = NOW(), last_error = $2 WHERE id = $1")
            .bind(change_id)
            .bind(error)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Falha recuperável: o evento continua pendente para a próxima drenagem.
    pub async fn record_error<'e, E>(&self, executor: E, change_id: i64, error: &str) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE entity_changes SET last_error = $2, attempts = attempts + 1 WHERE id = $1")
            .bind(change_id)
            .bind(error)
            .execute(executor)
            .await?;

        Ok(())
    }

    /// Tentativas esgotadas: o evento sai da fila com o último erro registrado.
    pub async fn give_up<'e, E>(&self, executor: E, change_id: i64, error: &str) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            "UPDATE entity_changes SET processed_at = NOW(), last_error = $2, attempts = attempts + 1 WHERE id = $1",
        )
        .bind(change_id)
        .bind(error)
        .execute(executor)
        .await?;

        Ok(())
    }
}
