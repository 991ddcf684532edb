// src/db/membership_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::membership::{Membership, MembershipStatus, NewAdjustment, Plan},
};

const MEMBERSHIP_COLUMNS: &str = r#"
    id, tenant_id, branch_id, client_id, plan_id, status, start_at, end_at,
    duration_type, duration, pause_started_at, pause_until, suspension_count,
    suspension_days_used, previous_membership_id, next_membership_id,
    consultant_user_id, canceled_at, allow_cross_branch_access, allowed_branch_ids
"#;

#[derive(Clone, Default)]
pub struct MembershipRepository;

impl MembershipRepository {
    pub fn new() -> Self {
        Self
    }

    // =========================================================================
    //  LEITURAS DA RECONCILIAÇÃO
    // =========================================================================

    /// Contratos em curso (ativos ou trancados) do tenant.
    pub async fn list_current<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<Vec<Membership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS} FROM memberships
            WHERE tenant_id = $1 AND status IN ('active', 'paused')
            ORDER BY start_at, id
            "#
        );
        let rows = sqlx::query_as::<_, Membership>(&sql)
            .bind(tenant_id)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    pub async fn list_pending<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<Vec<Membership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS} FROM memberships
            WHERE tenant_id = $1 AND status = 'pending'
            ORDER BY start_at, id
            "#
        );
        let rows = sqlx::query_as::<_, Membership>(&sql)
            .bind(tenant_id)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    pub async fn find_by_ids<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<Vec<Membership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE id = ANY($1)");
        let rows = sqlx::query_as::<_, Membership>(&sql)
            .bind(ids)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    /// Busca travando a linha (usado pelas operações administrativas dentro de uma transação).
    pub async fn find_for_update<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        membership_id: Uuid,
    ) -> Result<Option<Membership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE tenant_id = $1 AND id = $2 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, Membership>(&sql)
            .bind(tenant_id)
            .bind(membership_id)
            .fetch_optional(executor)
            .await?;

        Ok(row)
    }

    /// Contratos não cancelados da unidade que vencem exatamente em `date`.
    pub async fn list_ending_on<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<Membership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS} FROM memberships
            WHERE tenant_id = $1 AND branch_id = $2 AND status <> 'canceled' AND end_at = $3
            ORDER BY id
            "#
        );
        let rows = sqlx::query_as::<_, Membership>(&sql)
            .bind(tenant_id)
            .bind(branch_id)
            .bind(date)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    /// Contratos não encerrados com um recebível em aberto vencido antes de `cutoff`.
    pub async fn list_with_receivable_overdue_before<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
        cutoff: NaiveDate,
    ) -> Result<Vec<Membership>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            r#"
            SELECT {MEMBERSHIP_COLUMNS} FROM memberships m
            WHERE m.tenant_id = $1 AND m.branch_id = $2
              AND m.status IN ('pending', 'active', 'paused')
              AND EXISTS (
                  SELECT 1 FROM receivables r
                  WHERE r.membership_id = m.id
                    AND r.status IN ('pending', 'overdue')
                    AND r.due_date < $3
                    AND r.amount_cents > r.amount_paid_cents
              )
            ORDER BY m.id
            "#
        );
        let rows = sqlx::query_as::<_, Membership>(&sql)
            .bind(tenant_id)
            .bind(branch_id)
            .bind(cutoff)
            .fetch_all(executor)
            .await?;

        Ok(rows)
    }

    pub async fn find_plan<'e, E>(&self, executor: E, tenant_id: Uuid, plan_id: Uuid) -> Result<Option<Plan>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let plan = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, tenant_id, name, duration_type, duration, allow_freeze,
                   max_suspension_count, max_suspension_days, min_suspension_days, class_ids
            FROM plans
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(plan_id)
        .fetch_optional(executor)
        .await?;

        Ok(plan)
    }

    // =========================================================================
    //  ESCRITAS DAS OPERAÇÕES ADMINISTRATIVAS
    // =========================================================================

    /// Grava o trancamento: janela, novo término, contadores e (se já começou) o status.
    pub async fn apply_suspension<'e, E>(
        &self,
        executor: E,
        membership: &Membership,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE memberships
            SET status = $2, end_at = $3, pause_started_at = $4, pause_until = $5,
                suspension_count = $6, suspension_days_used = $7, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(membership.id)
        .bind(membership.status)
        .bind(membership.end_at)
        .bind(membership.pause_started_at)
        .bind(membership.pause_until)
        .bind(membership.suspension_count)
        .bind(membership.suspension_days_used)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn update_end_and_status<'e, E>(
        &self,
        executor: E,
        membership_id: Uuid,
        end_at: NaiveDate,
        status: MembershipStatus,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query("UPDATE memberships SET end_at = $2, status = $3, updated_at = NOW() WHERE id = $1")
            .bind(membership_id)
            .bind(end_at)
            .bind(status)
            .execute(executor)
            .await?;

        Ok(())
    }

    pub async fn mark_canceled<'e, E>(
        &self,
        executor: E,
        membership_id: Uuid,
        canceled_at: NaiveDate,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE memberships
            SET status = 'canceled', canceled_at = $2, pause_started_at = NULL, pause_until = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(membership_id)
        .bind(canceled_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// O aluno perde o vínculo com o contrato cancelado (se era o ativo).
    pub async fn detach_from_client<'e, E>(
        &self,
        executor: E,
        client_id: Uuid,
        membership_id: Uuid,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE clients SET active_membership_id = NULL, updated_at = NOW()
            WHERE id = $1 AND active_membership_id = $2
            "#,
        )
        .bind(client_id)
        .bind(membership_id)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn insert_adjustment<'e, E>(&self, executor: E, adjustment: &NewAdjustment) -> Result<Uuid, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO membership_adjustments (
                tenant_id, membership_id, kind, days, previous_end_at, new_end_at, reason, performed_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(adjustment.tenant_id)
        .bind(adjustment.membership_id)
        .bind(adjustment.kind)
        .bind(adjustment.days)
        .bind(adjustment.previous_end_at)
        .bind(adjustment.new_end_at)
        .bind(&adjustment.reason)
        .bind(adjustment.performed_by)
        .fetch_one(executor)
        .await?;

        Ok(id)
    }
}
