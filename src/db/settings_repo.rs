// src/db/settings_repo.rs

use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::settings::BranchAutomationSettingsRow};

#[derive(Clone, Default)]
pub struct SettingsRepository;

impl SettingsRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn find_branch_settings<'e, E>(
        &self,
        executor: E,
        branch_id: Uuid,
    ) -> Result<Option<BranchAutomationSettingsRow>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let row = sqlx::query_as::<_, BranchAutomationSettingsRow>(
            r#"
            SELECT
                branch_id,
                attendance_summary_at_midnight,
                abandonment_risk_enabled,
                abandonment_risk_days,
                auto_close_cashier_at_midnight,
                cancel_contracts_after_days_without_payment,
                inactive_after_renewal_days
            FROM branch_automation_settings
            WHERE branch_id = $1
            "#,
        )
        .bind(branch_id)
        .fetch_optional(executor)
        .await?;

        Ok(row)
    }

    /// Linhas de configuração de todas as unidades do tenant (unidades sem linha ficam de fora).
    pub async fn list_for_tenant<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
    ) -> Result<Vec<BranchAutomationSettingsRow>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let rows = sqlx::query_as::<_, BranchAutomationSettingsRow>(
            r#"
            SELECT
                s.branch_id,
                s.attendance_summary_at_midnight,
                s.abandonment_risk_enabled,
                s.abandonment_risk_days,
                s.auto_close_cashier_at_midnight,
                s.cancel_contracts_after_days_without_payment,
                s.inactive_after_renewal_days
            FROM branch_automation_settings s
            JOIN branches b ON b.id = s.branch_id
            WHERE b.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_all(executor)
        .await?;

        Ok(rows)
    }
}
