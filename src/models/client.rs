// src/models/client.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "client_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Inactive,
}

// O aluno. Os campos de status/presença são derivados pela automação.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Client {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub full_name: String,
    pub birth_date: Option<NaiveDate>,
    pub status: ClientStatus,
    pub created_by_user_id: Option<Uuid>,
    pub active_membership_id: Option<Uuid>,
    pub allow_cross_branch_access: bool,
    pub allowed_branch_ids: Vec<Uuid>,
    pub last_presence_date: Option<NaiveDate>,
    pub abandonment_risk: bool,
}
