// src/db/tenancy_repo.rs

use sqlx::{Executor, PgPool, Postgres};
use uuid::Uuid;

use crate::{
    common::error::AppError,
    models::tenancy::{Branch, StaffMember, Tenant},
};

#[derive(Clone)]
pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Todos os tenants, em ordem estável (a automação percorre um por um).
    /// Sempre fora de transação, direto no pool.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, AppError> {
        let tenants = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, created_at FROM tenants ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(tenants)
    }

    pub async fn list_branches<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<Vec<Branch>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let branches = sqlx::query_as::<_, Branch>(
            "SELECT id, tenant_id, name FROM branches WHERE tenant_id = $1 ORDER BY created_at, id",
        )
        .bind(tenant_id)
        .fetch_all(executor)
        .await?;

        Ok(branches)
    }

    /// Equipe ativa da unidade (usada para resolver o responsável das tarefas).
    pub async fn list_active_staff<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Vec<StaffMember>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let staff = sqlx::query_as::<_, StaffMember>(
            r#"
            SELECT id, branch_id, user_id, name, is_active
            FROM staff_members
            WHERE tenant_id = $1 AND branch_id = $2 AND is_active = TRUE
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .bind(branch_id)
        .fetch_all(executor)
        .await?;

        Ok(staff)
    }

    /// O usuário faz parte da equipe (ativa) de alguma unidade do tenant?
    pub async fn is_staff_of_tenant<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM staff_members
                WHERE tenant_id = $1 AND user_id = $2 AND is_active = TRUE
            )
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_one(executor)
        .await?;

        Ok(exists)
    }
}
