// src/services/membership_reconciler.rs
//
// Máquina de estados diária dos contratos. O planejamento é puro (listas de
// contratos + configuração + "hoje" => escritas); o serviço só lê, planeja e
// grava em três fases: ciclo de vida, ativação e status dos alunos.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    common::{dates::add_days, error::AppError},
    db::{ClientRepository, MembershipRepository, WriteOp},
    models::{
        automation::ReconcileReport,
        client::{Client, ClientStatus},
        membership::{Activation, Membership, MembershipStatus, Reschedule},
        settings::BranchAutomationSettings,
    },
    services::{
        settings_service::{settings_for, SettingsResolver},
        PgBatchWriter,
    },
};

type SettingsMap = HashMap<Uuid, BranchAutomationSettings>;

fn grace_for(membership: &Membership, settings: &SettingsMap) -> i64 {
    membership.grace_days(settings_for(settings, membership.branch_id).inactive_after_renewal_days)
}

// =========================================================================
//  FASE 1: EXPIRAR / RETOMAR / TRANCAR / ENCADEAR
// =========================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecyclePlan {
    pub expire: Vec<Uuid>,
    pub resume: Vec<Uuid>,
    pub pause: Vec<Uuid>,
    pub reschedule: Vec<Reschedule>,
}

impl LifecyclePlan {
    pub fn write_ops(&self) -> Vec<WriteOp> {
        let expire = self.expire.iter().map(|id| WriteOp::ExpireMembership { id: *id });
        let resume = self.resume.iter().map(|id| WriteOp::ResumeMembership { id: *id });
        let pause = self.pause.iter().map(|id| WriteOp::PauseMembership { id: *id });
        let reschedule = self.reschedule.iter().map(|r| WriteOp::RescheduleMembership {
            id: r.membership_id,
            start_at: r.start_at,
            end_at: r.end_at,
        });
        expire.chain(resume).chain(pause).chain(reschedule).collect()
    }

    /// Aplica o plano a uma cópia em memória (prévia e leitura pós-commit simulada).
    pub fn overlay(&self, membership: &mut Membership) {
        if self.expire.contains(&membership.id) {
            membership.status = MembershipStatus::Expired;
        } else if self.resume.contains(&membership.id) {
            membership.status = MembershipStatus::Active;
            membership.pause_started_at = None;
            membership.pause_until = None;
        } else if self.pause.contains(&membership.id) {
            membership.status = MembershipStatus::Paused;
        }
        if let Some(r) = self.reschedule.iter().find(|r| r.membership_id == membership.id) {
            membership.start_at = r.start_at;
            membership.end_at = Some(r.end_at);
        }
    }
}

pub fn plan_lifecycle(
    current: &[Membership],
    pending: &[Membership],
    settings: &SettingsMap,
    today: NaiveDate,
) -> LifecyclePlan {
    let mut plan = LifecyclePlan::default();

    for m in current {
        let grace = grace_for(m, settings);
        if m.is_lapsed(today, grace) {
            plan.expire.push(m.id);
            continue;
        }
        match m.status {
            MembershipStatus::Paused if m.pause_until.is_some_and(|until| until < today) => {
                plan.resume.push(m.id);
            }
            MembershipStatus::Active
                if m.pause_started_at.is_some_and(|start| start <= today)
                    && m.pause_until.is_some_and(|until| today <= until) =>
            {
                plan.pause.push(m.id);
            }
            _ => {}
        }
    }

    plan.reschedule = plan_chain(current, pending);
    plan
}

/// Propaga a corrente: o sucessor pendente começa no dia seguinte ao término
/// do anterior, e a caminhada segue por todos os sucessores pendentes.
pub fn plan_chain(current: &[Membership], pending: &[Membership]) -> Vec<Reschedule> {
    let pending_by_id: HashMap<Uuid, &Membership> = pending.iter().map(|m| (m.id, m)).collect();
    let mut reschedules = Vec::new();
    let mut visited = HashSet::new();

    for head in current {
        let mut end = head.end_at;
        let mut next = head.next_membership_id;
        visited.insert(head.id);

        while let (Some(prev_end), Some(next_id)) = (end, next) {
            let Some(successor) = pending_by_id.get(&next_id) else {
                break;
            };
            // Corrente circular
            if !visited.insert(successor.id) {
                break;
            }

            let expected_start = add_days(prev_end, 1);
            let successor_end = if successor.start_at != expected_start {
                let new_end = successor.duration_type.end_date(expected_start, successor.duration);
                reschedules.push(Reschedule {
                    membership_id: successor.id,
                    start_at: expected_start,
                    end_at: new_end,
                });
                Some(new_end)
            } else {
                successor.end_at
            };

            end = successor_end;
            next = successor.next_membership_id;
        }
    }

    reschedules
}

// =========================================================================
//  FASE 2: ATIVAÇÃO
// =========================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivationPlan {
    pub activate: Vec<Activation>,
    // Pendentes que já passaram do término + tolerância: vão direto para expirado
    pub expire: Vec<Uuid>,
    pub blocked: usize,
}

impl ActivationPlan {
    pub fn write_ops(&self) -> Vec<WriteOp> {
        self.expire
            .iter()
            .map(|id| WriteOp::ExpireMembership { id: *id })
            .chain(self.activate.iter().cloned().map(WriteOp::ActivateMembership))
            .collect()
    }

    pub fn activated_clients(&self) -> HashSet<Uuid> {
        self.activate.iter().map(|a| a.client_id).collect()
    }
}

/// `pending` já com o reagendamento aplicado; `predecessors` lidos depois da fase 1.
pub fn plan_activations(
    pending: &[Membership],
    predecessors: &HashMap<Uuid, Membership>,
    settings: &SettingsMap,
    today: NaiveDate,
) -> ActivationPlan {
    let mut plan = ActivationPlan::default();

    for m in pending.iter().filter(|m| m.start_at <= today) {
        let blocked = m
            .previous_membership_id
            .and_then(|id| predecessors.get(&id))
            .is_some_and(|prev| prev.blocks_successor(today));
        if blocked {
            plan.blocked += 1;
            continue;
        }

        if m.is_lapsed(today, grace_for(m, settings)) {
            plan.expire.push(m.id);
            continue;
        }

        plan.activate.push(Activation {
            membership_id: m.id,
            client_id: m.client_id,
            branch_id: m.branch_id,
            allow_cross_branch_access: m.allow_cross_branch_access,
            allowed_branch_ids: m.allowed_branch_ids.clone(),
        });
    }

    plan
}

// =========================================================================
//  FASE 3: STATUS DOS ALUNOS
// =========================================================================

/// Alunos cobertos hoje, por unidade do contrato.
pub fn covered_clients(
    current: &[Membership],
    lifecycle: &LifecyclePlan,
    activation: &ActivationPlan,
    settings: &SettingsMap,
    today: NaiveDate,
) -> HashMap<Uuid, HashSet<Uuid>> {
    let mut covered: HashMap<Uuid, HashSet<Uuid>> = HashMap::new();

    for m in current {
        if lifecycle.expire.contains(&m.id) {
            continue;
        }
        if m.covers(today, grace_for(m, settings)) {
            covered.entry(m.branch_id).or_default().insert(m.client_id);
        }
    }
    for a in &activation.activate {
        covered.entry(a.branch_id).or_default().insert(a.client_id);
    }

    covered
}

/// Ativo sse coberto na própria unidade. Só gera escrita quando muda.
pub fn plan_client_sync(clients: &[Client], covered: &HashMap<Uuid, HashSet<Uuid>>) -> Vec<(Uuid, ClientStatus)> {
    clients
        .iter()
        .filter_map(|c| {
            let is_covered = covered.get(&c.branch_id).is_some_and(|set| set.contains(&c.id));
            let wanted = if is_covered { ClientStatus::Active } else { ClientStatus::Inactive };
            (c.status != wanted).then_some((c.id, wanted))
        })
        .collect()
}

// =========================================================================
//  SERVIÇO
// =========================================================================

#[derive(Clone)]
pub struct MembershipReconciler {
    pool: PgPool,
    writer: PgBatchWriter,
    memberships: MembershipRepository,
    clients: ClientRepository,
    settings: SettingsResolver,
}

impl MembershipReconciler {
    pub fn new(
        pool: PgPool,
        writer: PgBatchWriter,
        memberships: MembershipRepository,
        clients: ClientRepository,
        settings: SettingsResolver,
    ) -> Self {
        Self { pool, writer, memberships, clients, settings }
    }

    async fn commit(&self, ops: Vec<WriteOp>, dry_run: bool) -> Result<usize, AppError> {
        if dry_run || ops.is_empty() {
            return Ok(0);
        }
        let report = self.writer.commit(ops).await.ensure_complete()?;
        Ok(report.committed_ops())
    }

    pub async fn reconcile_tenant(
        &self,
        tenant_id: Uuid,
        today: NaiveDate,
        dry_run: bool,
    ) -> Result<ReconcileReport, AppError> {
        // A configuração nunca falha (cai nos padrões); entra no join como Ok
        let (current, pending, settings) = tokio::try_join!(
            self.memberships.list_current(&self.pool, tenant_id),
            self.memberships.list_pending(&self.pool, tenant_id),
            async { Ok::<_, AppError>(self.settings.resolve_tenant(tenant_id).await) },
        )?;

        let mut report = ReconcileReport { tenant_id, ..Default::default() };

        // Fase 1: expira/retoma antes de qualquer ativação
        let lifecycle = plan_lifecycle(&current, &pending, &settings, today);
        report.expired = lifecycle.expire.len();
        report.resumed = lifecycle.resume.len();
        report.paused = lifecycle.pause.len();
        report.rescheduled = lifecycle.reschedule.len();
        report.writes += self.commit(lifecycle.write_ops(), dry_run).await?;

        // Fase 2: predecessores relidos depois do commit (ou sobrepostos, na prévia)
        let pending: Vec<Membership> = pending
            .into_iter()
            .map(|mut m| {
                lifecycle.overlay(&mut m);
                m
            })
            .collect();
        let predecessor_ids: Vec<Uuid> = pending
            .iter()
            .filter(|m| m.start_at <= today)
            .filter_map(|m| m.previous_membership_id)
            .collect();
        let predecessors: HashMap<Uuid, Membership> = self
            .memberships
            .find_by_ids(&self.pool, &predecessor_ids)
            .await?
            .into_iter()
            .map(|mut m| {
                if dry_run {
                    lifecycle.overlay(&mut m);
                }
                (m.id, m)
            })
            .collect();

        let activation = plan_activations(&pending, &predecessors, &settings, today);
        report.activated = activation.activate.len();
        report.activation_blocked = activation.blocked;
        report.expired += activation.expire.len();
        report.writes += self.commit(activation.write_ops(), dry_run).await?;

        // Fase 3: status dos alunos
        let covered = covered_clients(&current, &lifecycle, &activation, &settings, today);
        let activated = activation.activated_clients();
        let clients: Vec<Client> = self
            .clients
            .list_by_tenant(&self.pool, tenant_id)
            .await?
            .into_iter()
            .map(|mut c| {
                if activated.contains(&c.id) {
                    c.status = ClientStatus::Active;
                }
                c
            })
            .collect();
        let changes = plan_client_sync(&clients, &covered);
        report.client_status_changes = changes.len();
        let ops = changes
            .into_iter()
            .map(|(id, status)| WriteOp::SetClientStatus { id, status })
            .collect();
        report.writes += self.commit(ops, dry_run).await?;

        tracing::info!(
            %tenant_id,
            dry_run,
            expired = report.expired,
            resumed = report.resumed,
            activated = report.activated,
            clients = report.client_status_changes,
            "Contratos reconciliados"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::dates::parse_date_key,
        models::{membership::DurationType, settings::DEFAULT_BRANCH_SETTINGS},
    };

    const BRANCH: Uuid = Uuid::from_u128(0xB);

    fn d(raw: &str) -> NaiveDate {
        parse_date_key(raw).unwrap()
    }

    fn membership(id: u128, status: MembershipStatus, start: &str, end: Option<&str>) -> Membership {
        Membership {
            id: Uuid::from_u128(id),
            tenant_id: Uuid::from_u128(0xA),
            branch_id: BRANCH,
            client_id: Uuid::from_u128(1000 + id),
            plan_id: Uuid::from_u128(0xC),
            status,
            start_at: d(start),
            end_at: end.map(d),
            duration_type: DurationType::Month,
            duration: 1,
            pause_started_at: None,
            pause_until: None,
            suspension_count: 0,
            suspension_days_used: 0,
            previous_membership_id: None,
            next_membership_id: None,
            consultant_user_id: None,
            canceled_at: None,
            allow_cross_branch_access: false,
            allowed_branch_ids: vec![],
        }
    }

    fn client(id: Uuid, status: ClientStatus) -> Client {
        Client {
            id,
            tenant_id: Uuid::from_u128(0xA),
            branch_id: BRANCH,
            full_name: "Aluno".into(),
            birth_date: None,
            status,
            created_by_user_id: None,
            active_membership_id: None,
            allow_cross_branch_access: false,
            allowed_branch_ids: vec![],
            last_presence_date: None,
            abandonment_risk: false,
        }
    }

    fn settings_with_grace(days: i32) -> SettingsMap {
        let mut s = DEFAULT_BRANCH_SETTINGS;
        s.inactive_after_renewal_days = days;
        HashMap::from([(BRANCH, s)])
    }

    #[test]
    fn expires_after_end_plus_grace() {
        let m = membership(1, MembershipStatus::Active, "2024-02-10", Some("2024-03-10"));
        let settings = settings_with_grace(1);

        let plan = plan_lifecycle(std::slice::from_ref(&m), &[], &settings, d("2024-03-11"));
        assert!(plan.expire.is_empty());

        let plan = plan_lifecycle(std::slice::from_ref(&m), &[], &settings, d("2024-03-12"));
        assert_eq!(plan.expire, vec![m.id]);
    }

    #[test]
    fn planned_expiry_leaves_a_later_cancellation_alone() {
        let m = membership(1, MembershipStatus::Active, "2024-02-10", Some("2024-03-10"));
        let plan = plan_lifecycle(std::slice::from_ref(&m), &[], &settings_with_grace(0), d("2024-03-12"));
        let ops = plan.write_ops();
        assert_eq!(ops, vec![WriteOp::ExpireMembership { id: m.id }]);

        // A equipe cancela entre a leitura e o commit
        assert!(ops.iter().all(|op| !op.applies_to(MembershipStatus::Canceled)));
        assert!(ops[0].applies_to(m.status));
    }

    #[test]
    fn chained_membership_has_no_grace() {
        let mut m = membership(1, MembershipStatus::Active, "2024-02-10", Some("2024-03-10"));
        m.next_membership_id = Some(Uuid::from_u128(2));
        let plan = plan_lifecycle(&[m.clone()], &[], &settings_with_grace(5), d("2024-03-11"));
        assert_eq!(plan.expire, vec![m.id]);
    }

    #[test]
    fn resumes_the_day_after_pause_until() {
        let mut m = membership(1, MembershipStatus::Paused, "2024-02-01", Some("2024-04-15"));
        m.pause_started_at = Some(d("2024-03-01"));
        m.pause_until = Some(d("2024-03-05"));

        let plan = plan_lifecycle(std::slice::from_ref(&m), &[], &HashMap::new(), d("2024-03-05"));
        assert!(plan.resume.is_empty());

        let plan = plan_lifecycle(std::slice::from_ref(&m), &[], &HashMap::new(), d("2024-03-06"));
        assert_eq!(plan.resume, vec![m.id]);

        let mut resumed = m.clone();
        plan.overlay(&mut resumed);
        assert_eq!(resumed.status, MembershipStatus::Active);
        assert_eq!(resumed.pause_until, None);
    }

    #[test]
    fn scheduled_suspension_pauses_when_its_window_starts() {
        let mut m = membership(1, MembershipStatus::Active, "2024-02-01", Some("2024-04-15"));
        m.pause_started_at = Some(d("2024-03-10"));
        m.pause_until = Some(d("2024-03-14"));

        assert!(plan_lifecycle(&[m.clone()], &[], &HashMap::new(), d("2024-03-09")).pause.is_empty());
        assert_eq!(plan_lifecycle(&[m.clone()], &[], &HashMap::new(), d("2024-03-10")).pause, vec![m.id]);
    }

    #[test]
    fn chain_shifts_pending_successor_to_the_day_after() {
        let mut head = membership(1, MembershipStatus::Active, "2024-03-02", Some("2024-04-01"));
        let mut next = membership(2, MembershipStatus::Pending, "2024-03-20", Some("2024-04-19"));
        let mut last = membership(3, MembershipStatus::Pending, "2024-04-20", Some("2024-05-19"));
        head.next_membership_id = Some(next.id);
        next.previous_membership_id = Some(head.id);
        next.next_membership_id = Some(last.id);
        last.previous_membership_id = Some(next.id);

        let reschedules = plan_chain(&[head], &[next.clone(), last.clone()]);
        assert_eq!(
            reschedules,
            vec![
                Reschedule { membership_id: next.id, start_at: d("2024-04-02"), end_at: d("2024-05-01") },
                Reschedule { membership_id: last.id, start_at: d("2024-05-02"), end_at: d("2024-06-01") },
            ]
        );
    }

    #[test]
    fn chain_walk_survives_cycles() {
        let mut head = membership(1, MembershipStatus::Active, "2024-03-01", Some("2024-03-31"));
        let mut a = membership(2, MembershipStatus::Pending, "2024-04-01", Some("2024-04-30"));
        let mut b = membership(3, MembershipStatus::Pending, "2024-05-01", Some("2024-05-31"));
        head.next_membership_id = Some(a.id);
        a.next_membership_id = Some(b.id);
        b.next_membership_id = Some(a.id);

        assert!(plan_chain(&[head], &[a, b]).is_empty());
    }

    #[test]
    fn activation_waits_for_a_still_running_predecessor() {
        let prev = membership(1, MembershipStatus::Active, "2024-03-01", Some("2024-03-31"));
        let mut next = membership(2, MembershipStatus::Pending, "2024-03-15", Some("2024-04-14"));
        next.previous_membership_id = Some(prev.id);
        let predecessors = HashMap::from([(prev.id, prev.clone())]);

        let plan = plan_activations(&[next.clone()], &predecessors, &HashMap::new(), d("2024-03-20"));
        assert_eq!(plan.blocked, 1);
        assert!(plan.activate.is_empty());

        let mut expired = prev.clone();
        expired.status = MembershipStatus::Expired;
        let predecessors = HashMap::from([(prev.id, expired)]);
        let plan = plan_activations(&[next.clone()], &predecessors, &HashMap::new(), d("2024-03-20"));
        assert_eq!(plan.activate.len(), 1);
        assert_eq!(plan.activate[0].client_id, next.client_id);
    }

    #[test]
    fn lapsed_pending_goes_straight_to_expired() {
        let m = membership(1, MembershipStatus::Pending, "2024-01-01", Some("2024-01-31"));
        let plan = plan_activations(&[m.clone()], &HashMap::new(), &HashMap::new(), d("2024-03-01"));
        assert_eq!(plan.expire, vec![m.id]);
        assert!(plan.activate.is_empty());
    }

    #[test]
    fn client_status_follows_coverage_and_only_changes_are_written() {
        let today = d("2024-03-12");
        let covered_m = membership(1, MembershipStatus::Active, "2024-03-01", Some("2024-03-31"));
        let lapsed_m = membership(2, MembershipStatus::Active, "2024-02-01", Some("2024-03-01"));
        let current = vec![covered_m.clone(), lapsed_m.clone()];
        let settings = HashMap::new();

        let lifecycle = plan_lifecycle(&current, &[], &settings, today);
        let covered = covered_clients(&current, &lifecycle, &ActivationPlan::default(), &settings, today);

        let clients = vec![
            client(covered_m.client_id, ClientStatus::Active),
            client(lapsed_m.client_id, ClientStatus::Active),
            client(Uuid::from_u128(77), ClientStatus::Inactive),
        ];
        let changes = plan_client_sync(&clients, &covered);
        assert_eq!(changes, vec![(lapsed_m.client_id, ClientStatus::Inactive)]);
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let today = d("2024-03-12");
        let settings = settings_with_grace(1);
        let mut expiring = membership(1, MembershipStatus::Active, "2024-02-10", Some("2024-03-10"));
        let mut successor = membership(2, MembershipStatus::Pending, "2024-03-05", Some("2024-04-04"));
        expiring.next_membership_id = Some(successor.id);
        successor.previous_membership_id = Some(expiring.id);
        successor.client_id = expiring.client_id;

        // Primeira passada
        let first = plan_lifecycle(&[expiring.clone()], &[successor.clone()], &settings, today);
        assert_eq!(first.expire, vec![expiring.id]);
        assert_eq!(first.reschedule.len(), 1);

        let mut after_expiring = expiring.clone();
        first.overlay(&mut after_expiring);
        let mut after_successor = successor.clone();
        first.overlay(&mut after_successor);
        assert_eq!(after_successor.start_at, d("2024-03-11"));

        let predecessors = HashMap::from([(expiring.id, after_expiring.clone())]);
        let activation = plan_activations(&[after_successor.clone()], &predecessors, &settings, today);
        assert_eq!(activation.activate.len(), 1);

        // Segunda passada sobre o estado resultante: nada a fazer
        after_successor.status = MembershipStatus::Active;
        let second = plan_lifecycle(&[after_successor.clone()], &[], &settings, today);
        assert_eq!(second, LifecyclePlan::default());
        let activation = plan_activations(&[], &predecessors, &settings, today);
        assert!(activation.write_ops().is_empty());
    }
}
