// src/db/summary_repo.rs
//
// Documentos de resumo (diário/mensal). A soma de um delta é feita em Rust
// sobre a estrutura tipada: cria a linha se faltar, trava, mescla e regrava.

use sqlx::PgConnection;

use crate::{
    common::error::AppError,
    models::summary::{AttendanceFigures, SummaryFigures, SummaryTarget},
};

#[derive(Clone, Default)]
pub struct SummaryRepository;

impl SummaryRepository {
    pub fn new() -> Self {
        Self
    }

    /// Garante a existência do documento e o devolve travado (`FOR UPDATE`).
    async fn lock_figures(&self, conn: &mut PgConnection, target: &SummaryTarget) -> Result<SummaryFigures, AppError> {
        let raw = match target {
            SummaryTarget::Daily { tenant_id, branch_id, date } => {
                sqlx::query(
                    r#"
                    INSERT INTO daily_summaries (tenant_id, branch_id, summary_date)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (branch_id, summary_date) DO NOTHING
                    "#,
                )
                .bind(tenant_id)
                .bind(branch_id)
                .bind(date)
                .execute(&mut *conn)
                .await?;

                sqlx::query_scalar::<_, serde_json::Value>(
                    "SELECT figures FROM daily_summaries WHERE branch_id = $1 AND summary_date = $2 FOR UPDATE",
                )
                .bind(branch_id)
                .bind(date)
                .fetch_one(&mut *conn)
                .await?
            }
            SummaryTarget::Monthly { tenant_id, branch_id, month } => {
                sqlx::query(
                    r#"
                    INSERT INTO monthly_summaries (tenant_id, branch_id, month_key)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (branch_id, month_key) DO NOTHING
                    "#,
                )
                .bind(tenant_id)
                .bind(branch_id)
                .bind(month)
                .execute(&mut *conn)
                .await?;

                sqlx::query_scalar::<_, serde_json::Value>(
                    "SELECT figures FROM monthly_summaries WHERE branch_id = $1 AND month_key = $2 FOR UPDATE",
                )
                .bind(branch_id)
                .bind(month)
                .fetch_one(&mut *conn)
                .await?
            }
        };

        Ok(serde_json::from_value(raw)?)
    }

    async fn store_figures(
        &self,
        conn: &mut PgConnection,
        target: &SummaryTarget,
        figures: &SummaryFigures,
    ) -> Result<(), AppError> {
        let value = serde_json::to_value(figures)?;
        match target {
            SummaryTarget::Daily { branch_id, date, .. } => {
                sqlx::query(
                    "UPDATE daily_summaries SET figures = $3, updated_at = NOW() WHERE branch_id = $1 AND summary_date = $2",
                )
                .bind(branch_id)
                .bind(date)
                .bind(value)
                .execute(&mut *conn)
                .await?;
            }
            SummaryTarget::Monthly { branch_id, month, .. } => {
                sqlx::query(
                    "UPDATE monthly_summaries SET figures = $3, updated_at = NOW() WHERE branch_id = $1 AND month_key = $2",
                )
                .bind(branch_id)
                .bind(month)
                .bind(value)
                .execute(&mut *conn)
                .await?;
            }
        }
        Ok(())
    }

    /// Soma `delta` ao documento alvo, devolvendo o documento resultante.
    pub async fn apply_delta(
        &self,
        conn: &mut PgConnection,
        target: &SummaryTarget,
        delta: &SummaryFigures,
    ) -> Result<SummaryFigures, AppError> {
        let mut figures = self.lock_figures(conn, target).await?;
        figures.merge(delta);
        self.store_figures(conn, target, &figures).await?;
        Ok(figures)
    }

    /// Sobrescreve a seção de presenças do documento, devolvendo a seção anterior.
    pub async fn replace_attendance(
        &self,
        conn: &mut PgConnection,
        target: &SummaryTarget,
        attendance: AttendanceFigures,
    ) -> Result<AttendanceFigures, AppError> {
        let mut figures = self.lock_figures(conn, target).await?;
        let previous = std::mem::replace(&mut figures.attendance, attendance);
        self.store_figures(conn, target, &figures).await?;
        Ok(previous)
    }
}
