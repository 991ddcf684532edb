// src/models/tenancy.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

// ---
// 1. Tenant (a "Rede" de academias)
// ---
// Fronteira de isolamento. A automação nunca grava nele.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---
// 2. Branch (a "Unidade")
// ---
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
}

// ---
// 3. StaffMember (a "Equipe")
// ---
// Usado para resolver o responsável das tarefas a partir do usuário criador/consultor
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StaffMember {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub is_active: bool,
}
