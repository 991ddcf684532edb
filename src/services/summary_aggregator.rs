// src/services/summary_aggregator.rs
//
// Atualização incremental dos resumos diários/mensais. Cada registro-fonte sabe
// dizer com quanto contribui; uma alteração vira `contribuições(depois) -
// contribuições(antes)`, somada aos documentos alvo na mesma transação que
// marca o evento como processado.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{
    common::{dates::month_key, error::AppError},
    db::{ChangeRepository, ClientRepository, SummaryRepository},
    models::{
        attendance::AttendanceMark,
        finance::{CashMovement, CashMovementKind, Sale, SaleStatus},
        membership::{Membership, MembershipStatus},
        summary::{SummaryFigures, SummaryTarget},
    },
};

/// Quanto um registro soma em um (tenant, unidade, dia).
#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub date: NaiveDate,
    pub figures: SummaryFigures,
}

pub trait SummarySource {
    fn contributions(&self) -> Vec<Contribution>;
}

fn contribution(tenant_id: Uuid, branch_id: Uuid, date: NaiveDate, fill: impl FnOnce(&mut SummaryFigures)) -> Contribution {
    let mut figures = SummaryFigures::default();
    fill(&mut figures);
    Contribution { tenant_id, branch_id, date, figures }
}

impl SummarySource for Sale {
    fn contributions(&self) -> Vec<Contribution> {
        if self.status == SaleStatus::Canceled {
            return Vec::new();
        }
        vec![contribution(self.tenant_id, self.branch_id, self.sale_date, |f| {
            f.sales.count = 1;
            f.sales.total_cents = self.total_cents;
            f.sales.paid_cents = self.paid_cents;
            f.sales.discount_cents = self.discount_cents;
        })]
    }
}

impl SummarySource for CashMovement {
    fn contributions(&self) -> Vec<Contribution> {
        if self.reversed {
            return Vec::new();
        }
        vec![contribution(self.tenant_id, self.branch_id, self.movement_date, |f| match self.kind {
            CashMovementKind::Inflow => {
                f.cash_movements.inflow_count = 1;
                f.cash_movements.inflow_cents = self.amount_cents;
            }
            CashMovementKind::Outflow => {
                f.cash_movements.outflow_count = 1;
                f.cash_movements.outflow_cents = self.amount_cents;
            }
        })]
    }
}

impl SummarySource for AttendanceMark {
    fn contributions(&self) -> Vec<Contribution> {
        vec![contribution(self.tenant_id, self.branch_id, self.attendance_date, |f| {
            if self.present {
                f.attendance.present = 1;
                f.attendance.by_hour.insert(self.hour.clamp(0, 23) as u8, 1);
            } else {
                f.attendance.absent = 1;
            }
        })]
    }
}

impl SummarySource for Membership {
    fn contributions(&self) -> Vec<Contribution> {
        let mut out = vec![contribution(self.tenant_id, self.branch_id, self.start_at, |f| {
            if self.previous_membership_id.is_some() {
                f.memberships.renewals = 1;
            } else {
                f.memberships.new = 1;
            }
        })];
        if let (MembershipStatus::Canceled, Some(canceled_at)) = (self.status, self.canceled_at) {
            out.push(contribution(self.tenant_id, self.branch_id, canceled_at, |f| {
                f.memberships.canceled = 1;
            }));
        }
        out
    }
}

fn targets(c: &Contribution) -> [SummaryTarget; 2] {
    [
        SummaryTarget::Daily { tenant_id: c.tenant_id, branch_id: c.branch_id, date: c.date },
        SummaryTarget::Monthly { tenant_id: c.tenant_id, branch_id: c.branch_id, month: month_key(c.date) },
    ]
}

/// Delta por documento alvo: soma o "depois", subtrai o "antes" e descarta os nulos.
pub fn diff_contributions(before: &[Contribution], after: &[Contribution]) -> BTreeMap<SummaryTarget, SummaryFigures> {
    let mut deltas: BTreeMap<SummaryTarget, SummaryFigures> = BTreeMap::new();

    for c in after {
        for target in targets(c) {
            deltas.entry(target).or_default().merge(&c.figures);
        }
    }
    for c in before {
        let negated = c.figures.negated();
        for target in targets(c) {
            deltas.entry(target).or_default().merge(&negated);
        }
    }

    deltas.retain(|_, figures| !figures.is_zero());
    deltas
}

/// Delta de uma alteração sem a parte de um (unidade, dia) já recontado.
pub fn diff_outside_day(
    before: &[Contribution],
    after: &[Contribution],
    branch_id: Uuid,
    date: NaiveDate,
) -> BTreeMap<SummaryTarget, SummaryFigures> {
    let outside = |side: &[Contribution]| -> Vec<Contribution> {
        side.iter()
            .filter(|c| !(c.branch_id == branch_id && c.date == date))
            .cloned()
            .collect()
    };
    diff_contributions(&outside(before), &outside(after))
}

/// Presença recém-marcada (não estava presente antes)?
pub fn newly_present(before: Option<&AttendanceMark>, after: Option<&AttendanceMark>) -> Option<(Uuid, NaiveDate)> {
    let after = after.filter(|a| a.present)?;
    let was_present = before.is_some_and(|b| b.present && b.client_id == after.client_id);
    (!was_present).then_some((after.client_id, after.attendance_date))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateOutcome {
    pub documents_updated: usize,
    pub already_processed: bool,
}

#[derive(Clone)]
pub struct SummaryAggregator {
    pool: PgPool,
    summaries: SummaryRepository,
    changes: ChangeRepository,
    clients: ClientRepository,
}

impl SummaryAggregator {
    pub fn new(
        pool: PgPool,
        summaries: SummaryRepository,
        changes: ChangeRepository,
        clients: ClientRepository,
    ) -> Self {
        Self { pool, summaries, changes, clients }
    }

    /// Aplica um evento do feed exatamente uma vez.
    pub async fn apply_change<S: SummarySource>(
        &self,
        change_id: i64,
        before: Option<&S>,
        after: Option<&S>,
    ) -> Result<AggregateOutcome, AppError> {
        self.apply_with(change_id, before, after, None).await
    }

    /// Variante das presenças: além do delta, atualiza a última presença do aluno.
    pub async fn apply_attendance_change(
        &self,
        change_id: i64,
        before: Option<&AttendanceMark>,
        after: Option<&AttendanceMark>,
    ) -> Result<AggregateOutcome, AppError> {
        let presence = newly_present(before, after);
        self.apply_with(change_id, before, after, presence).await
    }

    async fn apply_with<S: SummarySource>(
        &self,
        change_id: i64,
        before: Option<&S>,
        after: Option<&S>,
        presence: Option<(Uuid, NaiveDate)>,
    ) -> Result<AggregateOutcome, AppError> {
        let before = before.map(|s| s.contributions()).unwrap_or_default();
        let after = after.map(|s| s.contributions()).unwrap_or_default();
        let deltas = diff_contributions(&before, &after);

        let mut tx = self.pool.begin().await?;

        if !self.changes.claim(&mut *tx, change_id).await? {
            tracing::debug!(change_id, "Evento já processado, ignorando");
            return Ok(AggregateOutcome { documents_updated: 0, already_processed: true });
        }

        self.apply_deltas(&mut *tx, &deltas).await?;
        if let Some((client_id, date)) = presence {
            self.clients.record_presence(&mut *tx, client_id, date).await?;
        }

        tx.commit().await?;
        Ok(AggregateOutcome { documents_updated: deltas.len(), already_processed: false })
    }

    pub async fn apply_deltas(
        &self,
        conn: &mut PgConnection,
        deltas: &BTreeMap<SummaryTarget, SummaryFigures>,
    ) -> Result<(), AppError> {
        // Ordem fixa dos alvos (BTreeMap) evita deadlock entre workers
        for (target, delta) in deltas {
            self.summaries.apply_delta(conn, target, delta).await?;
        }
        Ok(())
    }
}
