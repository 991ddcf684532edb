// src/services/task_generator.rs
//
// Tarefas diárias de acompanhamento (aniversário, vencimento de contrato,
// cobrança). IDs determinísticos + pré-carga das existentes + criação
// idempotente: rodar de novo no mesmo dia não duplica nada.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::{dates::is_birthday, error::AppError},
    db::{ClientRepository, FinanceRepository, MembershipRepository, TaskRepository, TenantRepository, WriteOp},
    models::{
        automation::{BranchTaskReport, RunScope, TenantTaskReport},
        client::Client,
        finance::{format_brl, Receivable, ReceivableKind},
        membership::{Membership, MembershipStatus},
        task::{task_id, NewTask, TaskKind},
        tenancy::{Branch, StaffMember},
    },
    services::PgBatchWriter,
};

/// Tudo que o planejamento de uma unidade precisa, já carregado.
pub struct BranchTaskInputs<'a> {
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub today: NaiveDate,
    pub staff: &'a [StaffMember],
    pub clients: &'a [Client],
    pub memberships_ending: &'a [Membership],
    pub receivables_due: &'a [Receivable],
    pub existing_ids: &'a HashSet<String>,
}

pub fn plan_branch_tasks(input: &BranchTaskInputs<'_>) -> Vec<NewTask> {
    // Equipe indexada pelo usuário (criador / consultor)
    let staff_by_user: HashMap<Uuid, Uuid> = input.staff.iter().map(|s| (s.user_id, s.id)).collect();
    let assignee = |user: Option<Uuid>| user.and_then(|u| staff_by_user.get(&u).copied());
    let clients: HashMap<Uuid, &Client> = input.clients.iter().map(|c| (c.id, c)).collect();

    let mut planned = Vec::new();
    let mut push = |kind: TaskKind,
                    source_id: Uuid,
                    client_id: Option<Uuid>,
                    staff_id: Uuid,
                    title: String,
                    description: Option<String>| {
        let id = task_id(kind, source_id, input.today);
        if input.existing_ids.contains(&id) {
            return;
        }
        planned.push(NewTask {
            id,
            tenant_id: input.tenant_id,
            branch_id: input.branch_id,
            kind,
            date_key: input.today,
            title,
            description,
            source_id,
            client_id,
            assigned_staff_id: staff_id,
        });
    };

    for client in input.clients {
        let Some(birth_date) = client.birth_date else { continue };
        if !is_birthday(birth_date, input.today) {
            continue;
        }
        let Some(staff_id) = assignee(client.created_by_user_id) else { continue };
        push(
            TaskKind::Birthday,
            client.id,
            Some(client.id),
            staff_id,
            format!("Aniversário de {}", client.full_name),
            None,
        );
    }

    for membership in input.memberships_ending {
        if membership.status == MembershipStatus::Canceled || membership.end_at != Some(input.today) {
            continue;
        }
        let Some(client) = clients.get(&membership.client_id) else { continue };
        let resolved = assignee(membership.consultant_user_id).or_else(|| assignee(client.created_by_user_id));
        let Some(staff_id) = resolved else { continue };
        push(
            TaskKind::ContractDue,
            membership.id,
            Some(client.id),
            staff_id,
            format!("Contrato de {} vence hoje", client.full_name),
            None,
        );
    }

    for receivable in input.receivables_due {
        if receivable.kind != ReceivableKind::Manual
            || !receivable.status.is_open()
            || receivable.due_date != input.today
        {
            continue;
        }
        let Some(staff_id) = assignee(receivable.consultant_user_id) else { continue };
        let who = receivable
            .client_id
            .and_then(|id| clients.get(&id))
            .map(|c| c.full_name.clone())
            .unwrap_or_else(|| "cliente".to_string());
        push(
            TaskKind::DebtDue,
            receivable.id,
            receivable.client_id,
            staff_id,
            format!("Cobrança de {}", who),
            Some(format!("Valor em aberto: {}", format_brl(receivable.outstanding_cents()))),
        );
    }

    planned
}

pub fn count_by_kind(tasks: &[NewTask]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for task in tasks {
        *counts.entry(task.kind.prefix().to_string()).or_insert(0) += 1;
    }
    counts
}

#[derive(Clone)]
pub struct TaskGenerator {
    pool: PgPool,
    writer: PgBatchWriter,
    tenants: TenantRepository,
    clients: ClientRepository,
    memberships: MembershipRepository,
    finance: FinanceRepository,
    tasks: TaskRepository,
}

impl TaskGenerator {
    pub fn new(
        pool: PgPool,
        writer: PgBatchWriter,
        tenants: TenantRepository,
        clients: ClientRepository,
        memberships: MembershipRepository,
        finance: FinanceRepository,
        tasks: TaskRepository,
    ) -> Self {
        Self { pool, writer, tenants, clients, memberships, finance, tasks }
    }

    pub async fn generate_for_tenant(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
        scope: &RunScope,
        dry_run: bool,
    ) -> Result<TenantTaskReport, AppError> {
        let branches = self.tenants.list_branches(&self.pool, tenant_id).await?;
        let mut report = TenantTaskReport { tenant_id, ..Default::default() };

        for branch in branches.iter().filter(|b| scope.includes_branch(tenant_id, b.id)) {
            // Falha em uma unidade não derruba as outras
            let branch_report = match self.generate_for_branch(branch, today, dry_run).await {
                Ok(r) => r,
                Err(e) => {
                    tracing::error!(%tenant_id, branch_id = %branch.id, "Falha ao gerar tarefas: {}", e);
                    report.errors.push(format!("{}: {}", branch.id, e));
                    BranchTaskReport { branch_id: branch.id, errors: vec![e.to_string()], ..Default::default() }
                }
            };
            report.planned_tasks += branch_report.planned_tasks;
            report.branches.push(branch_report);
        }

        Ok(report)
    }

    async fn generate_for_branch(
        &self,
        branch: &Branch,
        today: NaiveDate,
        dry_run: bool,
    ) -> Result<BranchTaskReport, AppError> {
        let mut report = BranchTaskReport { branch_id: branch.id, ..Default::default() };

        let staff = self.tenants.list_active_staff(&self.pool, branch.tenant_id, branch.id).await?;
        if staff.is_empty() {
            tracing::debug!(branch_id = %branch.id, "Unidade sem equipe, nenhuma tarefa possível");
            report.skipped_without_staff = true;
            return Ok(report);
        }

        let (clients, memberships_ending, receivables_due, existing_ids) = tokio::try_join!(
            self.clients.list_by_branch(&self.pool, branch.tenant_id, branch.id),
            self.memberships.list_ending_on(&self.pool, branch.tenant_id, branch.id, today),
            self.finance.list_open_due_on(&self.pool, branch.tenant_id, branch.id, today),
            self.tasks.existing_ids_for_day(&self.pool, branch.id, today),
        )?;

        let planned = plan_branch_tasks(&BranchTaskInputs {
            tenant_id: branch.tenant_id,
            branch_id: branch.id,
            today,
            staff: &staff,
            clients: &clients,
            memberships_ending: &memberships_ending,
            receivables_due: &receivables_due,
            existing_ids: &existing_ids,
        });
        report.planned_tasks = planned.len();
        report.tasks_by_kind = count_by_kind(&planned);

        if dry_run {
            report.previews = planned;
            return Ok(report);
        }

        let ops = planned.into_iter().map(WriteOp::CreateTask).collect();
        let batch = self.writer.commit(ops).await;
        report.created = batch.created();
        report.already_existing = batch.already_existing();
        if let Some(reason) = &batch.aborted {
            report.errors.push(reason.clone());
        }

        tracing::info!(
            branch_id = %branch.id,
            created = report.created,
            already_existing = report.already_existing,
            "Tarefas do dia geradas"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::dates::parse_date_key,
        models::{client::ClientStatus, finance::ReceivableStatus, membership::DurationType},
    };

    const TENANT: Uuid = Uuid::from_u128(0xA);
    const BRANCH: Uuid = Uuid::from_u128(0xB);
    const CREATOR: Uuid = Uuid::from_u128(0x100);
    const CONSULTANT: Uuid = Uuid::from_u128(0x200);

    fn d(raw: &str) -> NaiveDate {
        parse_date_key(raw).unwrap()
    }

    fn staff() -> Vec<StaffMember> {
        vec![
            StaffMember { id: Uuid::from_u128(0x1), branch_id: BRANCH, user_id: CREATOR, name: "Ana".into(), is_active: true },
            StaffMember { id: Uuid::from_u128(0x2), branch_id: BRANCH, user_id: CONSULTANT, name: "Bia".into(), is_active: true },
        ]
    }

    fn client(n: u128, birth: Option<&str>, creator: Option<Uuid>) -> Client {
        Client {
            id: Uuid::from_u128(n),
            tenant_id: TENANT,
            branch_id: BRANCH,
            full_name: format!("Aluno {n}"),
            birth_date: birth.map(d),
            status: ClientStatus::Active,
            created_by_user_id: creator,
            active_membership_id: None,
            allow_cross_branch_access: false,
            allowed_branch_ids: vec![],
            last_presence_date: None,
            abandonment_risk: false,
        }
    }

    fn ending_membership(client_id: Uuid, consultant: Option<Uuid>, end: &str) -> Membership {
        Membership {
            id: Uuid::from_u128(0x500),
            tenant_id: TENANT,
            branch_id: BRANCH,
            client_id,
            plan_id: Uuid::from_u128(0x600),
            status: MembershipStatus::Active,
            start_at: d("2024-02-16"),
            end_at: Some(d(end)),
            duration_type: DurationType::Month,
            duration: 1,
            pause_started_at: None,
            pause_until: None,
            suspension_count: 0,
            suspension_days_used: 0,
            previous_membership_id: None,
            next_membership_id: None,
            consultant_user_id: consultant,
            canceled_at: None,
            allow_cross_branch_access: false,
            allowed_branch_ids: vec![],
        }
    }

    fn receivable(kind: ReceivableKind, amount: i64, paid: i64) -> Receivable {
        Receivable {
            id: Uuid::from_u128(0x700),
            tenant_id: TENANT,
            branch_id: BRANCH,
            sale_id: None,
            membership_id: None,
            client_id: Some(Uuid::from_u128(1)),
            kind,
            status: ReceivableStatus::Overdue,
            due_date: d("2024-03-15"),
            amount_cents: amount,
            amount_paid_cents: paid,
            consultant_user_id: Some(CONSULTANT),
            description: None,
        }
    }

    fn plan(
        clients: &[Client],
        memberships: &[Membership],
        receivables: &[Receivable],
        existing: &HashSet<String>,
    ) -> Vec<NewTask> {
        let staff = staff();
        plan_branch_tasks(&BranchTaskInputs {
            tenant_id: TENANT,
            branch_id: BRANCH,
            today: d("2024-03-15"),
            staff: &staff,
            clients,
            memberships_ending: memberships,
            receivables_due: receivables,
            existing_ids: existing,
        })
    }

    #[test]
    fn birthday_task_is_created_once_per_day() {
        let clients = vec![client(1, Some("1990-03-15"), Some(CREATOR)), client(2, Some("1990-03-16"), Some(CREATOR))];

        let first = plan(&clients, &[], &[], &HashSet::new());
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, format!("birthday_{}_2024-03-15", Uuid::from_u128(1)));
        assert_eq!(first[0].assigned_staff_id, Uuid::from_u128(0x1));

        // Segunda execução no mesmo dia: a tarefa já existe
        let existing: HashSet<String> = first.iter().map(|t| t.id.clone()).collect();
        assert!(plan(&clients, &[], &[], &existing).is_empty());
    }

    #[test]
    fn clients_without_resolvable_assignee_are_skipped() {
        let clients = vec![client(1, Some("1990-03-15"), None), client(2, Some("1990-03-15"), Some(Uuid::from_u128(0x999)))];
        assert!(plan(&clients, &[], &[], &HashSet::new()).is_empty());
    }

    #[test]
    fn contract_due_prefers_consultant_and_falls_back_to_creator() {
        let owner = client(1, None, Some(CREATOR));
        let with_consultant = ending_membership(owner.id, Some(CONSULTANT), "2024-03-15");
        let tasks = plan(&[owner.clone()], &[with_consultant], &[], &HashSet::new());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::ContractDue);
        assert_eq!(tasks[0].assigned_staff_id, Uuid::from_u128(0x2));

        let without = ending_membership(owner.id, None, "2024-03-15");
        let tasks = plan(&[owner.clone()], &[without], &[], &HashSet::new());
        assert_eq!(tasks[0].assigned_staff_id, Uuid::from_u128(0x1));

        let mut canceled = ending_membership(owner.id, None, "2024-03-15");
        canceled.status = MembershipStatus::Canceled;
        assert!(plan(&[owner], &[canceled], &[], &HashSet::new()).is_empty());
    }

    #[test]
    fn debt_task_carries_outstanding_amount() {
        let clients = vec![client(1, None, None)];
        let tasks = plan(&clients, &[], &[receivable(ReceivableKind::Manual, 15000, 2550)], &HashSet::new());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].description.as_deref(), Some("Valor em aberto: R$ 124,50"));

        let overpaid = plan(&clients, &[], &[receivable(ReceivableKind::Manual, 100, 500)], &HashSet::new());
        assert_eq!(overpaid[0].description.as_deref(), Some("Valor em aberto: R$ 0,00"));

        assert!(plan(&clients, &[], &[receivable(ReceivableKind::Sale, 100, 0)], &HashSet::new()).is_empty());
    }

    #[test]
    fn counts_tasks_by_kind() {
        let owner = client(1, Some("2000-03-15"), Some(CREATOR));
        let tasks = plan(
            &[owner.clone()],
            &[ending_membership(owner.id, None, "2024-03-15")],
            &[receivable(ReceivableKind::Manual, 100, 0)],
            &HashSet::new(),
        );
        let counts = count_by_kind(&tasks);
        assert_eq!(counts.get("birthday"), Some(&1));
        assert_eq!(counts.get("contract_due"), Some(&1));
        assert_eq!(counts.get("debt_due"), Some(&1));
    }
}
