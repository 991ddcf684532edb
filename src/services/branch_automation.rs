// src/services/branch_automation.rs
//
// Rotina da meia-noite por unidade, guiada pela configuração resolvida:
// fechamento das presenças de ontem, fechamento de caixa, risco de abandono,
// recebíveis vencidos e cancelamento por inadimplência.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::{
        batch_writer::{classify, FailureClass},
        dates::{add_days, month_key},
        error::AppError,
    },
    db::{
        AttendanceRepository, ChangeRepository, ClientRepository, FinanceRepository, MembershipRepository,
        SummaryRepository, TenantRepository, WriteOp,
    },
    models::{
        attendance::AttendanceMark,
        automation::BranchAutomationReport,
        change::EntityChange,
        client::{Client, ClientStatus},
        finance::{Receivable, ReceivableStatus},
        settings::BranchAutomationSettings,
        summary::{AttendanceFigures, SummaryFigures, SummaryTarget},
        tenancy::Branch,
    },
    services::{
        change_feed::{normalize, NormalizedChange},
        membership_admin::MembershipAdminService,
        settings_service::SettingsResolver,
        summary_aggregator::{diff_outside_day, newly_present, SummarySource},
        PgBatchWriter,
    },
};

// Tentativas da recontagem quando o snapshot conflita com o feed
const FINALIZE_RETRIES: u32 = 3;

// =========================================================================
//  PLANEJAMENTO (puro)
// =========================================================================

/// Seção de presenças recalculada a partir das marcações do dia.
pub fn attendance_figures(marks: &[AttendanceMark]) -> AttendanceFigures {
    let mut figures = AttendanceFigures::default();
    for mark in marks {
        if mark.present {
            figures.present += 1;
            *figures.by_hour.entry(mark.hour.clamp(0, 23) as u8).or_insert(0) += 1;
        } else {
            figures.absent += 1;
        }
    }
    figures
}

/// Em risco: aluno ativo sem presença, ou com a última presença há mais de `days` dias.
/// Só devolve os alunos cuja marcação muda.
pub fn plan_abandonment_risk(clients: &[Client], today: NaiveDate, days: i32) -> Vec<(Uuid, bool)> {
    let threshold = add_days(today, -(days.max(0) as i64));
    clients
        .iter()
        .filter_map(|c| {
            let at_risk = c.status == ClientStatus::Active
                && c.last_presence_date.is_none_or(|last| last < threshold);
            (at_risk != c.abandonment_risk).then_some((c.id, at_risk))
        })
        .collect()
}

/// O que sobra dos eventos de presença reivindicados pela recontagem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClaimedAttendance {
    // Parte fora do dia recontado (marcação movida de/para outro dia ou unidade)
    pub deltas: BTreeMap<SummaryTarget, SummaryFigures>,
    pub presences: Vec<(Uuid, NaiveDate)>,
    pub malformed: usize,
}

pub fn fold_claimed_attendance(claimed: &[EntityChange], branch_id: Uuid, day: NaiveDate) -> ClaimedAttendance {
    let mut folded = ClaimedAttendance::default();
    for change in claimed {
        let Ok(NormalizedChange::Attendance(s)) = normalize(change) else {
            folded.malformed += 1;
            continue;
        };
        let before = s.before.as_ref().map(|m| m.contributions()).unwrap_or_default();
        let after = s.after.as_ref().map(|m| m.contributions()).unwrap_or_default();
        for (target, delta) in diff_outside_day(&before, &after, branch_id, day) {
            folded.deltas.entry(target).or_default().merge(&delta);
        }
        if let Some(presence) = newly_present(s.before.as_ref(), s.after.as_ref()) {
            folded.presences.push(presence);
        }
    }
    folded.deltas.retain(|_, figures| !figures.is_zero());
    folded
}

pub fn plan_overdue(receivables: &[Receivable], today: NaiveDate) -> Vec<Uuid> {
    receivables
        .iter()
        .filter(|r| r.status == ReceivableStatus::Pending && r.due_date < today)
        .map(|r| r.id)
        .collect()
}

// =========================================================================
//  SERVIÇO
// =========================================================================

#[derive(Clone)]
pub struct BranchAutomationService {
    pool: PgPool,
    writer: PgBatchWriter,
    settings: SettingsResolver,
    tenants: TenantRepository,
    clients: ClientRepository,
    memberships: MembershipRepository,
    finance: FinanceRepository,
    attendance: AttendanceRepository,
    summaries: SummaryRepository,
    changes: ChangeRepository,
    admin: MembershipAdminService,
}

impl BranchAutomationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        writer: PgBatchWriter,
        settings: SettingsResolver,
        tenants: TenantRepository,
        clients: ClientRepository,
        memberships: MembershipRepository,
        finance: FinanceRepository,
        attendance: AttendanceRepository,
        summaries: SummaryRepository,
        changes: ChangeRepository,
        admin: MembershipAdminService,
    ) -> Self {
        Self { pool, writer, settings, tenants, clients, memberships, finance, attendance, summaries, changes, admin }
    }

    pub async fn run_for_tenant(&self, tenant_id: Uuid, today: NaiveDate) -> Result<Vec<BranchAutomationReport>, AppError> {
        let branches = self.tenants.list_branches(&self.pool, tenant_id).await?;
        let mut reports = Vec::with_capacity(branches.len());

        for branch in &branches {
            let settings = self.settings.resolve(branch.id).await;
            reports.push(self.run_for_branch(branch, &settings, today).await);
        }
        Ok(reports)
    }

    /// Cada etapa é independente: um erro é anotado e a próxima segue.
    pub async fn run_for_branch(
        &self,
        branch: &Branch,
        settings: &BranchAutomationSettings,
        today: NaiveDate,
    ) -> BranchAutomationReport {
        let mut report = BranchAutomationReport { branch_id: branch.id, ..Default::default() };
        let note = |step: &str, e: AppError| {
            tracing::error!(tenant_id = %branch.tenant_id, branch_id = %branch.id, step, "Falha na automação: {}", e);
            format!("{}: {}", step, e)
        };

        if settings.attendance_summary_at_midnight {
            match self.finalize_attendance(branch, add_days(today, -1)).await {
                Ok(()) => report.attendance_finalized = true,
                Err(e) => report.errors.push(note("attendance_summary", e)),
            }
        }

        if settings.auto_close_cashier_at_midnight {
            match self.close_cashier_sessions(branch, today).await {
                Ok(n) => report.cashier_sessions_closed = n,
                Err(e) => report.errors.push(note("cashier_close", e)),
            }
        }

        if settings.abandonment_risk_enabled {
            match self.refresh_abandonment_risk(branch, today, settings.abandonment_risk_days).await {
                Ok(n) => report.abandonment_risk_changes = n,
                Err(e) => report.errors.push(note("abandonment_risk", e)),
            }
        }

        match self.mark_overdue_receivables(branch, today).await {
            Ok(n) => report.receivables_overdue = n,
            Err(e) => report.errors.push(note("receivables_overdue", e)),
        }

        if settings.cancel_contracts_after_days_without_payment > 0 {
            match self
                .cancel_unpaid_contracts(branch, today, settings.cancel_contracts_after_days_without_payment)
                .await
            {
                Ok(n) => report.contracts_canceled = n,
                Err(e) => report.errors.push(note("contract_cancel", e)),
            }
        }

        report
    }

    async fn finalize_attendance(&self, branch: &Branch, day: NaiveDate) -> Result<(), AppError> {
        let mut attempt = 0;
        loop {
            match self.finalize_attendance_once(branch, day).await {
                Err(AppError::DatabaseError(e))
                    if classify(&e) == FailureClass::Transient && attempt < FINALIZE_RETRIES =>
                {
                    attempt += 1;
                    tracing::warn!(branch_id = %branch.id, attempt, "Recontagem de presenças conflitou, repetindo: {}", e);
                }
                other => return other,
            }
        }
    }

    /// Recalcula as presenças de `day`, sobrescreve a seção do resumo diário e
    /// aplica a diferença no mensal. Os eventos de presença ainda pendentes
    /// para o dia são reivindicados na mesma transação: a recontagem já os
    /// inclui, e o feed não pode somá-los de novo.
    async fn finalize_attendance_once(&self, branch: &Branch, day: NaiveDate) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        // Reivindicação e leitura das marcações enxergam o mesmo snapshot
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await?;

        let claimed = self.changes.claim_attendance_for_day(&mut *tx, branch.id, day).await?;
        let marks = self.attendance.list_for_day(&mut *tx, branch.tenant_id, branch.id, day).await?;
        let recomputed = attendance_figures(&marks);

        let daily = SummaryTarget::Daily { tenant_id: branch.tenant_id, branch_id: branch.id, date: day };
        let previous = self.summaries.replace_attendance(&mut *tx, &daily, recomputed.clone()).await?;

        let mut correction = SummaryFigures::default();
        correction.attendance = recomputed;
        correction.attendance.merge(&previous.negated());
        if !correction.is_zero() {
            let monthly = SummaryTarget::Monthly {
                tenant_id: branch.tenant_id,
                branch_id: branch.id,
                month: month_key(day),
            };
            self.summaries.apply_delta(&mut *tx, &monthly, &correction).await?;
        }

        let leftover = fold_claimed_attendance(&claimed, branch.id, day);
        if leftover.malformed > 0 {
            tracing::warn!(branch_id = %branch.id, malformed = leftover.malformed, "Eventos de presença ilegíveis descartados");
        }
        for (target, delta) in &leftover.deltas {
            self.summaries.apply_delta(&mut *tx, target, delta).await?;
        }
        for (client_id, date) in &leftover.presences {
            self.clients.record_presence(&mut *tx, *client_id, *date).await?;
        }

        tx.commit().await?;
        tracing::debug!(branch_id = %branch.id, %day, claimed = claimed.len(), "Presenças do dia fechadas");
        Ok(())
    }

    async fn close_cashier_sessions(&self, branch: &Branch, today: NaiveDate) -> Result<usize, AppError> {
        let sessions = self
            .finance
            .list_open_cashier_sessions_before(&self.pool, branch.tenant_id, branch.id, today)
            .await?;
        let ops = sessions.iter().map(|s| WriteOp::CloseCashierSession { id: s.id }).collect();
        let report = self.writer.commit(ops).await.ensure_complete()?;
        Ok(report.committed_ops())
    }

    async fn refresh_abandonment_risk(&self, branch: &Branch, today: NaiveDate, days: i32) -> Result<usize, AppError> {
        let clients = self.clients.list_by_branch(&self.pool, branch.tenant_id, branch.id).await?;
        let ops = plan_abandonment_risk(&clients, today, days)
            .into_iter()
            .map(|(id, at_risk)| WriteOp::SetAbandonmentRisk { id, at_risk })
            .collect();
        let report = self.writer.commit(ops).await.ensure_complete()?;
        Ok(report.committed_ops())
    }

    async fn mark_overdue_receivables(&self, branch: &Branch, today: NaiveDate) -> Result<usize, AppError> {
        let receivables = self
            .finance
            .list_pending_past_due(&self.pool, branch.tenant_id, branch.id, today)
            .await?;
        let ops = plan_overdue(&receivables, today)
            .into_iter()
            .map(|id| WriteOp::MarkReceivableOverdue { id })
            .collect();
        let report = self.writer.commit(ops).await.ensure_complete()?;
        Ok(report.committed_ops())
    }

    /// Contratos com recebível vencido há mais de `days` dias são cancelados
    /// pela mesma rotina da operação manual.
    async fn cancel_unpaid_contracts(&self, branch: &Branch, today: NaiveDate, days: i32) -> Result<usize, AppError> {
        let cutoff = add_days(today, -(days as i64));
        let memberships = self
            .memberships
            .list_with_receivable_overdue_before(&self.pool, branch.tenant_id, branch.id, cutoff)
            .await?;

        let mut canceled = 0;
        for membership in memberships {
            let reason = Some(format!("Cancelado automaticamente após {} dias sem pagamento", days));
            match self.admin.cancel(branch.tenant_id, membership.id, reason, None, today).await {
                Ok(_) => canceled += 1,
                // Cancelado por outra via entre a leitura e a escrita
                Err(AppError::BusinessRule("membership_already_canceled")) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(canceled)
    }
}
