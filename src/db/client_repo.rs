// src/db/client_repo.rs

use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::{common::error::AppError, models::client::Client};

const CLIENT_COLUMNS: &str = r#"
    id, tenant_id, branch_id, full_name, birth_date, status, created_by_user_id,
    active_membership_id, allow_cross_branch_access, allowed_branch_ids,
    last_presence_date, abandonment_risk
"#;

#[derive(Clone, Default)]
pub struct ClientRepository;

impl ClientRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn list_by_tenant<'e, E>(&self, executor: E, tenant_id: Uuid) -> Result<Vec<Client>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE tenant_id = $1 ORDER BY id");
        let clients = sqlx::query_as::<_, Client>(&sql)
            .bind(tenant_id)
            .fetch_all(executor)
            .await?;

        Ok(clients)
    }

    pub async fn list_by_branch<'e, E>(
        &self,
        executor: E,
        tenant_id: Uuid,
        branch_id: Uuid,
    ) -> Result<Vec<Client>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        let sql = format!(
            "SELECT {CLIENT_COLUMNS} FROM clients WHERE tenant_id = $1 AND branch_id = $2 ORDER BY id"
        );
        let clients = sqlx::query_as::<_, Client>(&sql)
            .bind(tenant_id)
            .bind(branch_id)
            .fetch_all(executor)
            .await?;

        Ok(clients)
    }

    pub async fn find_by_ids<'e, E>(&self, executor: E, ids: &[Uuid]) -> Result<Vec<Client>, AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE id = ANY($1)");
        let clients = sqlx::query_as::<_, Client>(&sql)
            .bind(ids)
            .fetch_all(executor)
            .await?;

        Ok(clients)
    }

    /// Registra uma presença: a data só avança, e o risco de abandono é limpo.
    pub async fn record_presence<'e, E>(
        &self,
        executor: E,
        client_id: Uuid,
        date: NaiveDate,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            UPDATE clients
            SET last_presence_date = GREATEST(COALESCE(last_presence_date, $2), $2),
                abandonment_risk = FALSE,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(client_id)
        .bind(date)
        .execute(executor)
        .await?;

        Ok(())
    }
}
