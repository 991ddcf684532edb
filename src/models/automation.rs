// src/models/automation.rs
//
// Entradas e saídas da superfície de execução manual (prévia / dry-run).

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::task::NewTask;

#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// Data de referência; padrão = hoje (UTC)
    #[schema(value_type = Option<String>, format = Date, example = "2024-03-15")]
    pub date: Option<NaiveDate>,
    pub tenant_ids: Option<Vec<Uuid>>,
    pub branch_ids_by_tenant: Option<HashMap<Uuid, Vec<Uuid>>>,
    #[serde(default)]
    pub dry_run: bool,
}

/// Filtro de escopo de uma execução (todos os tenants/unidades quando vazio).
#[derive(Debug, Clone, Default)]
pub struct RunScope {
    pub tenant_ids: Option<Vec<Uuid>>,
    pub branch_ids_by_tenant: Option<HashMap<Uuid, Vec<Uuid>>>,
}

impl RunScope {
    pub fn includes_tenant(&self, tenant_id: Uuid) -> bool {
        self.tenant_ids.as_ref().is_none_or(|ids| ids.contains(&tenant_id))
    }

    pub fn includes_branch(&self, tenant_id: Uuid, branch_id: Uuid) -> bool {
        self.branch_ids_by_tenant
            .as_ref()
            .and_then(|map| map.get(&tenant_id))
            .is_none_or(|ids| ids.contains(&branch_id))
    }
}

impl From<&RunRequest> for RunScope {
    fn from(req: &RunRequest) -> Self {
        Self {
            tenant_ids: req.tenant_ids.clone(),
            branch_ids_by_tenant: req.branch_ids_by_tenant.clone(),
        }
    }
}

// --- Tarefas ---

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BranchTaskReport {
    pub branch_id: Uuid,
    pub skipped_without_staff: bool,
    pub planned_tasks: usize,
    pub created: usize,
    pub already_existing: usize,
    pub tasks_by_kind: BTreeMap<String, usize>,
    pub previews: Vec<NewTask>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantTaskReport {
    pub tenant_id: Uuid,
    pub planned_tasks: usize,
    pub branches: Vec<BranchTaskReport>,
    pub errors: Vec<String>,
}

// --- Reconciliação de matrículas ---

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub tenant_id: Uuid,
    pub expired: usize,
    pub paused: usize,
    pub resumed: usize,
    pub rescheduled: usize,
    pub activated: usize,
    pub activation_blocked: usize,
    pub client_status_changes: usize,
    pub writes: usize,
}

// --- Automação de unidade ---

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BranchAutomationReport {
    pub branch_id: Uuid,
    pub attendance_finalized: bool,
    pub cashier_sessions_closed: usize,
    pub abandonment_risk_changes: usize,
    pub receivables_overdue: usize,
    pub contracts_canceled: usize,
    pub errors: Vec<String>,
}

// --- Resultado genérico de uma execução por tenant ---

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantOutcome<T> {
    pub tenant_id: Uuid,
    pub result: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary<T> {
    pub job: String,
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    pub dry_run: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub tenants: Vec<TenantOutcome<T>>,
}
