// src/services/tenant_runner.rs
//
// Raiz da automação: percorre os tenants um por um e aplica um trabalho a cada
// um, isolando as falhas. O resultado é um resumo por tenant, nunca um erro global.

use std::future::Future;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    common::error::AppError,
    db::TenantRepository,
    models::automation::{
        BranchAutomationReport, ReconcileReport, RunRequest, RunScope, RunSummary, TenantOutcome,
        TenantTaskReport,
    },
    services::{
        branch_automation::BranchAutomationService, membership_reconciler::MembershipReconciler,
        task_generator::TaskGenerator,
    },
};

pub const JOB_BRANCH_AUTOMATION: &str = "branch_automation";
pub const JOB_MEMBERSHIP_SYNC: &str = "membership_sync";
pub const JOB_TASK_GENERATION: &str = "task_generation";

/// Dobra sequencial sobre os tenants: cada falha vira um `TenantOutcome` com erro.
pub async fn run_per_tenant<T, F, Fut>(
    job: &str,
    date: NaiveDate,
    dry_run: bool,
    tenant_ids: Vec<Uuid>,
    mut work: F,
) -> RunSummary<T>
where
    F: FnMut(Uuid) -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut summary = RunSummary {
        job: job.to_string(),
        date,
        dry_run,
        succeeded: 0,
        failed: 0,
        tenants: Vec::with_capacity(tenant_ids.len()),
    };

    for tenant_id in tenant_ids {
        match work(tenant_id).await {
            Ok(result) => {
                summary.succeeded += 1;
                summary.tenants.push(TenantOutcome { tenant_id, result: Some(result), error: None });
            }
            Err(e) => {
                tracing::error!(%tenant_id, job, "❌ Falha ao processar tenant: {}", e);
                summary.failed += 1;
                summary.tenants.push(TenantOutcome { tenant_id, result: None, error: Some(e.to_string()) });
            }
        }
    }

    tracing::info!(
        job,
        %date,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Execução concluída"
    );
    summary
}

/// A reconciliação roda por tenant inteiro (a corrente de contratos cruza
/// unidades): filtro por unidade é recusado em vez de ignorado.
pub fn membership_scope(request: &RunRequest) -> Result<RunScope, AppError> {
    if request.branch_ids_by_tenant.is_some() {
        return Err(AppError::BusinessRule("branch_filter_not_supported"));
    }
    Ok(RunScope::from(request))
}

#[derive(Clone)]
pub struct TenantRunner {
    tenants: TenantRepository,
    reconciler: MembershipReconciler,
    tasks: TaskGenerator,
    branch_automation: BranchAutomationService,
}

impl TenantRunner {
    pub fn new(
        tenants: TenantRepository,
        reconciler: MembershipReconciler,
        tasks: TaskGenerator,
        branch_automation: BranchAutomationService,
    ) -> Self {
        Self { tenants, reconciler, tasks, branch_automation }
    }

    async fn tenant_ids(&self, scope: &RunScope) -> Result<Vec<Uuid>, AppError> {
        let tenants = self.tenants.list_tenants().await?;
        Ok(tenants
            .into_iter()
            .map(|t| t.id)
            .filter(|id| scope.includes_tenant(*id))
            .collect())
    }

    pub async fn run_membership_sync(
        &self,
        date: NaiveDate,
        request: &RunRequest,
    ) -> Result<RunSummary<ReconcileReport>, AppError> {
        let scope = membership_scope(request)?;
        let tenant_ids = self.tenant_ids(&scope).await?;
        let dry_run = request.dry_run;
        let reconciler = &self.reconciler;

        Ok(run_per_tenant(JOB_MEMBERSHIP_SYNC, date, dry_run, tenant_ids, move |tenant_id| {
            reconciler.reconcile_tenant(tenant_id, date, dry_run)
        })
        .await)
    }

    pub async fn run_tasks(
        &self,
        date: NaiveDate,
        request: &RunRequest,
    ) -> Result<RunSummary<TenantTaskReport>, AppError> {
        let scope = RunScope::from(request);
        let tenant_ids = self.tenant_ids(&scope).await?;
        let dry_run = request.dry_run;
        let scope = &scope;
        let tasks = &self.tasks;

        Ok(run_per_tenant(JOB_TASK_GENERATION, date, dry_run, tenant_ids, move |tenant_id| {
            tasks.generate_for_tenant(tenant_id, date, scope, dry_run)
        })
        .await)
    }

    pub async fn run_branch_automation(
        &self,
        date: NaiveDate,
    ) -> Result<RunSummary<Vec<BranchAutomationReport>>, AppError> {
        let scope = RunScope::default();
        let tenant_ids = self.tenant_ids(&scope).await?;

        let automation = &self.branch_automation;

        Ok(run_per_tenant(JOB_BRANCH_AUTOMATION, date, false, tenant_ids, move |tenant_id| {
            automation.run_for_tenant(tenant_id, date)
        })
        .await)
    }
}
