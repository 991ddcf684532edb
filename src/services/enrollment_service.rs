// src/services/enrollment_service.rs
//
// Contagens de matrículas ativas por turma e por sessão datada.
// Incremental: contagem exata da turma + ±1 nas sessões das janelas antiga/nova.
// Em lote: recontagem de todas as sessões de um intervalo (a rede de segurança).

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::AppError,
    db::{ChangeRepository, EnrollmentRepository, WriteOp},
    models::enrollment::{ClassSession, Enrollment, ValidityWindow},
    services::PgBatchWriter,
};

pub const MAX_RECOUNT_RANGE_DAYS: i64 = 366;

// =========================================================================
//  PLANEJAMENTO (puro)
// =========================================================================

/// Deltas por sessão quando a janela efetiva muda de `old` para `new`.
pub fn session_adjustments(
    old: Option<ValidityWindow>,
    new: Option<ValidityWindow>,
    sessions: &[ClassSession],
) -> Vec<(Uuid, i64)> {
    if old == new {
        return Vec::new();
    }
    let inside = |window: Option<ValidityWindow>, date| window.is_some_and(|w| w.contains(date)) as i64;

    sessions
        .iter()
        .filter_map(|s| {
            let delta = inside(new, s.session_date) - inside(old, s.session_date);
            (delta != 0).then_some((s.id, delta))
        })
        .collect()
}

/// Menor intervalo que contém as duas janelas (`None` em `to` = aberto).
pub fn window_span(a: Option<ValidityWindow>, b: Option<ValidityWindow>) -> Option<ValidityWindow> {
    match (a, b) {
        (None, None) => None,
        (Some(w), None) | (None, Some(w)) => Some(w),
        (Some(a), Some(b)) => Some(ValidityWindow {
            from: a.from.min(b.from),
            to: match (a.to, b.to) {
                (Some(x), Some(y)) => Some(x.max(y)),
                _ => None,
            },
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecount {
    pub session_id: Uuid,
    pub class_id: Uuid,
    #[schema(value_type = String, format = Date)]
    pub session_date: NaiveDate,
    pub previous: i64,
    pub count: i64,
}

/// Recalcula cada sessão a partir das matrículas (agrupadas uma vez por turma).
/// Devolve apenas as sessões cuja contagem difere da gravada.
pub fn recount_sessions(sessions: &[ClassSession], enrollments: &[Enrollment]) -> Vec<SessionRecount> {
    let mut by_class: HashMap<Uuid, Vec<&Enrollment>> = HashMap::new();
    for e in enrollments {
        by_class.entry(e.class_id).or_default().push(e);
    }

    sessions
        .iter()
        .filter_map(|s| {
            let count = by_class
                .get(&s.class_id)
                .map(|list| list.iter().filter(|e| e.is_active_on(s.session_date)).count() as i64)
                .unwrap_or(0);
            (count != s.enrolled_count).then_some(SessionRecount {
                session_id: s.id,
                class_id: s.class_id,
                session_date: s.session_date,
                previous: s.enrolled_count,
                count,
            })
        })
        .collect()
}

/// Escritas de uma turma afetada por um evento: a contagem exata da turma e
/// o ±1 de cada sessão que mudou de lado.
pub fn class_change_ops(
    class_id: Uuid,
    count: i64,
    old: Option<ValidityWindow>,
    new: Option<ValidityWindow>,
    sessions: &[ClassSession],
) -> Vec<WriteOp> {
    std::iter::once(WriteOp::SetClassEnrolledCount { class_id, count })
        .chain(
            session_adjustments(old, new, sessions)
                .into_iter()
                .map(|(session_id, delta)| WriteOp::AdjustSessionEnrolledCount { session_id, delta }),
        )
        .collect()
}

// =========================================================================
//  ENTRADAS / SAÍDAS
// =========================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecountRequest {
    #[schema(value_type = String, format = Date, example = "2024-03-01")]
    pub from: NaiveDate,
    #[schema(value_type = String, format = Date, example = "2024-03-31")]
    pub to: NaiveDate,
    #[validate(length(min = 1, message = "empty"))]
    pub class_ids: Option<Vec<Uuid>>,
    pub plan_id: Option<Uuid>,
}

impl RecountRequest {
    pub fn check_range(&self) -> Result<(), AppError> {
        if self.to < self.from {
            return Err(AppError::BusinessRule("invalid_date_range"));
        }
        if (self.to - self.from).num_days() >= MAX_RECOUNT_RANGE_DAYS {
            return Err(AppError::BusinessRule("date_range_too_long"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecountReport {
    pub sessions_scanned: usize,
    pub sessions_updated: usize,
    pub changes: Vec<SessionRecount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncrementalOutcome {
    pub classes_updated: usize,
    pub session_adjustments: usize,
    pub already_processed: bool,
}

// =========================================================================
//  SERVIÇO
// =========================================================================

#[derive(Clone)]
pub struct EnrollmentService {
    pool: PgPool,
    writer: PgBatchWriter,
    repo: EnrollmentRepository,
    changes: ChangeRepository,
}

impl EnrollmentService {
    pub fn new(pool: PgPool, writer: PgBatchWriter, repo: EnrollmentRepository, changes: ChangeRepository) -> Self {
        Self { pool, writer, repo, changes }
    }

    /// Aplica uma alteração de matrícula vinda do feed. Reivindicação, leituras
    /// e escritas vão em uma única transação: o evento só sai da fila junto com
    /// todos os ajustes que ele gerou.
    pub async fn apply_change(
        &self,
        change_id: i64,
        before: Option<&Enrollment>,
        after: Option<&Enrollment>,
        today: NaiveDate,
    ) -> Result<IncrementalOutcome, AppError> {
        let mut tx = self.pool.begin().await?;

        if !self.changes.claim(&mut *tx, change_id).await? {
            tracing::debug!(change_id, "Evento já processado, ignorando");
            return Ok(IncrementalOutcome { already_processed: true, ..Default::default() });
        }

        let mut outcome = IncrementalOutcome::default();
        let classes: BTreeSet<Uuid> = before.iter().chain(after.iter()).map(|e| e.class_id).collect();
        for class_id in classes {
            let old = before.filter(|e| e.class_id == class_id).and_then(Enrollment::effective_window);
            let new = after.filter(|e| e.class_id == class_id).and_then(Enrollment::effective_window);

            // Contagem exata (consulta direta, sem aritmética acumulada)
            let count = self.repo.count_active_on(&mut *tx, class_id, today).await?;
            let sessions = match window_span(old, new).filter(|_| old != new) {
                Some(span) => {
                    self.repo
                        .list_class_sessions_in_window(&mut *tx, class_id, span.from, span.to)
                        .await?
                }
                None => Vec::new(),
            };

            let ops = class_change_ops(class_id, count, old, new, &sessions);
            for op in &ops {
                op.execute(&mut *tx).await?;
            }
            outcome.classes_updated += 1;
            outcome.session_adjustments += ops.len() - 1;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn recount(
        &self,
        tenant_id: Uuid,
        branch_id: Option<Uuid>,
        request: &RecountRequest,
    ) -> Result<RecountReport, AppError> {
        request.check_range()?;

        let class_filter = match (&request.class_ids, request.plan_id) {
            (Some(ids), _) => Some(ids.clone()),
            (None, Some(plan_id)) => Some(
                self.repo
                    .class_ids_for_plan(&self.pool, tenant_id, plan_id)
                    .await?
                    .ok_or(AppError::NotFound("plan_not_found"))?,
            ),
            (None, None) => None,
        };

        let sessions = self
            .repo
            .list_sessions(&self.pool, tenant_id, branch_id, request.from, request.to, class_filter.as_deref())
            .await?;
        let class_ids: Vec<Uuid> = sessions
            .iter()
            .map(|s| s.class_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let enrollments = self.repo.list_for_classes(&self.pool, &class_ids).await?;

        let changes = recount_sessions(&sessions, &enrollments);
        let ops = changes
            .iter()
            .map(|c| WriteOp::SetSessionEnrolledCount { session_id: c.session_id, count: c.count })
            .collect();
        self.writer.commit(ops).await.ensure_complete()?;

        tracing::info!(
            %tenant_id,
            scanned = sessions.len(),
            updated = changes.len(),
            "Sessões recontadas"
        );
        Ok(RecountReport {
            sessions_scanned: sessions.len(),
            sessions_updated: changes.len(),
            changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::dates::parse_date_key, models::enrollment::EnrollmentStatus};

    const CLASS: Uuid = Uuid::from_u128(0xC1);

    fn d(raw: &str) -> NaiveDate {
        parse_date_key(raw).unwrap()
    }

    fn window(from: &str, to: Option<&str>) -> Option<ValidityWindow> {
        Some(ValidityWindow { from: d(from), to: to.map(d) })
    }

    fn session(n: u128, date: &str, count: i64) -> ClassSession {
        ClassSession { id: Uuid::from_u128(n), class_id: CLASS, session_date: d(date), enrolled_count: count }
    }

    fn enrollment(n: u128, status: EnrollmentStatus, from: &str, to: Option<&str>) -> Enrollment {
        Enrollment {
            id: Uuid::from_u128(n),
            tenant_id: Uuid::from_u128(0xA),
            branch_id: Uuid::from_u128(0xB),
            client_id: Uuid::from_u128(100 + n),
            class_id: CLASS,
            membership_id: None,
            status,
            effective_from: d(from),
            effective_to: to.map(d),
        }
    }

    fn weekly_sessions() -> Vec<ClassSession> {
        vec![
            session(1, "2024-03-04", 0),
            session(2, "2024-03-11", 0),
            session(3, "2024-03-18", 0),
            session(4, "2024-03-25", 0),
        ]
    }

    #[test]
    fn identical_windows_produce_no_adjustments() {
        let w = window("2024-03-01", Some("2024-03-31"));
        assert!(session_adjustments(w, w, &weekly_sessions()).is_empty());
    }

    #[test]
    fn moving_the_window_unapplies_old_and_applies_new() {
        let old = window("2024-03-01", Some("2024-03-12"));
        let new = window("2024-03-10", None);
        let deltas = session_adjustments(old, new, &weekly_sessions());
        // 04/03 sai, 11/03 fica nas duas, 18 e 25 entram
        assert_eq!(
            deltas,
            vec![(Uuid::from_u128(1), -1), (Uuid::from_u128(3), 1), (Uuid::from_u128(4), 1)]
        );
    }

    #[test]
    fn deactivation_is_an_empty_window() {
        let old = window("2024-03-01", None);
        let deltas = session_adjustments(old, None, &weekly_sessions());
        assert_eq!(deltas.len(), 4);
        assert!(deltas.iter().all(|(_, delta)| *delta == -1));
    }

    #[test]
    fn open_window_event_keeps_every_adjustment_together() {
        // Janela aberta sobre mais sessões do que cabe em um bloco do BatchWriter
        let sessions: Vec<ClassSession> = (0..452u128)
            .map(|n| ClassSession {
                id: Uuid::from_u128(1000 + n),
                class_id: CLASS,
                session_date: d("2024-03-04") + chrono::Days::new(7 * n as u64),
                enrolled_count: 0,
            })
            .collect();
        let ops = class_change_ops(CLASS, 12, None, window("2024-03-01", None), &sessions);

        assert_eq!(ops.len(), 453);
        assert_eq!(ops[0], WriteOp::SetClassEnrolledCount { class_id: CLASS, count: 12 });
        assert!(ops[1..]
            .iter()
            .all(|op| matches!(op, WriteOp::AdjustSessionEnrolledCount { delta: 1, .. })));
    }

    #[test]
    fn unchanged_window_only_refreshes_the_class_count() {
        let w = window("2024-03-01", None);
        let ops = class_change_ops(CLASS, 3, w, w, &weekly_sessions());
        assert_eq!(ops, vec![WriteOp::SetClassEnrolledCount { class_id: CLASS, count: 3 }]);
    }

    #[test]
    fn span_covers_both_windows() {
        let span = window_span(window("2024-03-10", Some("2024-03-20")), window("2024-03-01", Some("2024-03-15")));
        assert_eq!(span, window("2024-03-01", Some("2024-03-20")));
        assert_eq!(window_span(window("2024-03-10", None), window("2024-03-01", Some("2024-03-15"))), window("2024-03-01", None));
        assert_eq!(window_span(None, None), None);
    }

    #[test]
    fn recount_matches_active_enrollments_on_each_date() {
        let sessions = vec![session(1, "2024-03-04", 5), session(2, "2024-03-11", 2), session(3, "2024-03-18", 0)];
        let enrollments = vec![
            enrollment(1, EnrollmentStatus::Active, "2024-03-01", None),
            enrollment(2, EnrollmentStatus::Active, "2024-03-10", Some("2024-03-17")),
            enrollment(3, EnrollmentStatus::Inactive, "2024-03-01", None),
        ];

        let changes = recount_sessions(&sessions, &enrollments);
        // 11/03 já estava correto (2) e não é regravada
        assert_eq!(changes.len(), 2);
        assert_eq!((changes[0].previous, changes[0].count), (5, 1));
        assert_eq!((changes[1].previous, changes[1].count), (0, 1));
    }

    #[test]
    fn recount_range_is_validated() {
        let req = |from: &str, to: &str| RecountRequest { from: d(from), to: d(to), class_ids: None, plan_id: None };
        assert!(req("2024-01-01", "2024-12-31").check_range().is_ok());
        assert!(matches!(
            req("2024-03-02", "2024-03-01").check_range(),
            Err(AppError::BusinessRule("invalid_date_range"))
        ));
        assert!(matches!(
            req("2024-01-01", "2025-01-02").check_range(),
            Err(AppError::BusinessRule("date_range_too_long"))
        ));
    }
}
