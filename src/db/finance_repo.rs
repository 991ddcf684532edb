// src/db/finance_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::finance::{CashierSession, Receivable},
};

const RECEIVABLE_COLUMNS: &str = r#"
    id, tenant_id, branch_id, sale_id, membership_id, client_id, kind, status,
    due_date, amount_cents, amount_paid_cents, consultant_user_id, description
"#;

#[derive(Clone, Default)]
pub struct FinanceRepository;

impl FinanceRepository {
    pub fn new() -> Self {
        Self
    }

    // =========================================================================
    //  CONTAS A RECEBER
    // =========================================================================

    /// Recebíveis em aberto que vencem em `date` (base das tarefas de cobrança).
    pub async fn list_open_due_on<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Receivable>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {RECEIVABLE_COLUMNS} FROM receivables
            WHERE tenant_id = $1 AND branch_id = $2 AND due_date = $3
              AND status IN ('pending', 'overdue')
            ORDER BY id
            "#
        );
        let rows = sqlx::query_as::<_, Receivable>(&sql)
            .bind(tenant_id)
            .bind(branch_id)
            .bind(date)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    /// Recebíveis ainda "pendentes" com vencimento anterior a `today`.
    pub async fn list_pending_past_due<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<Receivable>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {RECEIVABLE_COLUMNS} FROM receivables
            WHERE tenant_id = $1 AND branch_id = $2 AND status = 'pending' AND due_date < $3
            ORDER BY due_date, id
            "#
        );
        let rows = sqlx::query_as::<_, Receivable>(&sql)
            .bind(tenant_id)
            .bind(branch_id)
            .bind(today)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    pub async fn cancel_open_for_membership<'e, E>(&self, executor: E, membership_id: Uuid) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE receivables SET status = 'canceled'
            WHERE membership_id = $1 AND status IN ('pending', 'overdue')
            "#,
        )
        .bind(membership_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    //  CAIXA
    // =========================================================================

    /// Estorna os lançamentos antecipados (ainda não estornados) de um contrato.
    pub async fn reverse_anticipated_movements<'e, E>(
        &self,
        executor: E,
        membership_id: Uuid,
    ) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let result = sqlx::query(
            r#"
            UPDATE cash_movements SET reversed = TRUE
            WHERE membership_id = $1 AND anticipated = TRUE AND reversed = FALSE
            "#,
        )
        .bind(membership_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Sessões de caixa ainda abertas desde antes de `today`.
    pub async fn list_open_cashier_sessions_before<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
        today: NaiveDate,
    ) -> Result<Vec<CashierSession>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sessions = sqlx::query_as::<_, CashierSession>(
            r#"
            SELECT id, branch_id, opened_at
            FROM cashier_sessions
            WHERE tenant_id = $1 AND branch_id = $2 AND status = 'open'
              AND (opened_at AT TIME ZONE 'UTC')::date < $3
            ORDER BY opened_at
            "#,
        )
        .bind(tenant_id)
        .bind(branch_id)
        .bind(today)
        .fetch_all(executor)
        .await?;

        Ok(sessions)
    }
}
