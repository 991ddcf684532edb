// src/services/change_feed.rs
//
// Consumidor do outbox `entity_changes`. Acorda por NOTIFY (ou por tempo, se o
// LISTEN cair), lê os eventos pendentes em ordem de id e despacha cada um
// para o agregador de resumos ou para as contagens de matrícula.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{postgres::PgListener, PgPool};
use uuid::Uuid;

use crate::{
    common::{dates::today_utc, error::AppError},
    db::ChangeRepository,
    models::{
        attendance::AttendanceMark,
        change::EntityChange,
        enrollment::Enrollment,
        finance::{CashMovement, Sale},
        membership::Membership,
    },
    services::{enrollment_service::EnrollmentService, summary_aggregator::SummaryAggregator},
};

pub const CHANNEL: &str = "entity_changes";
const DRAIN_BATCH: i64 = 200;

/// Par antes/depois já tipado.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshots<T> {
    pub before: Option<T>,
    pub after: Option<T>,
}

impl<T> Snapshots<T> {
    fn pair(&self) -> (Option<&T>, Option<&T>) {
        (self.before.as_ref(), self.after.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedChange {
    Sale(Snapshots<Sale>),
    CashMovement(Snapshots<CashMovement>),
    Attendance(Snapshots<AttendanceMark>),
    Membership(Snapshots<Membership>),
    Enrollment(Snapshots<Enrollment>),
}

fn snapshot<T: DeserializeOwned>(raw: &Option<Value>, side: &str) -> Result<Option<T>, AppError> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| AppError::InvalidChange(format!("snapshot '{}' malformado: {}", side, e))),
    }
}

fn snapshots<T: DeserializeOwned>(change: &EntityChange) -> Result<Snapshots<T>, AppError> {
    let before = snapshot(&change.before, "before")?;
    let after = snapshot(&change.after, "after")?;
    if before.is_none() && after.is_none() {
        return Err(AppError::InvalidChange("evento sem snapshots".into()));
    }
    Ok(Snapshots { before, after })
}

/// Converte a linha crua do outbox no tipo de domínio correspondente.
pub fn normalize(change: &EntityChange) -> Result<NormalizedChange, AppError> {
    match change.entity.as_str() {
        "sale" => snapshots(change).map(NormalizedChange::Sale),
        "cash_movement" => snapshots(change).map(NormalizedChange::CashMovement),
        "attendance" => snapshots(change).map(NormalizedChange::Attendance),
        "membership" => snapshots(change).map(NormalizedChange::Membership),
        "enrollment" => snapshots(change).map(NormalizedChange::Enrollment),
        other => Err(AppError::InvalidChange(format!("entidade desconhecida: {}", other))),
    }
}

// =========================================================================
//  DRENAGEM
// =========================================================================

/// Falhas seguidas antes de o evento sair da fila com o último erro.
pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Retry,
    GiveUp,
}

/// `attempts` = falhas já registradas antes desta.
pub fn failure_action(attempts: i32) -> FailureAction {
    if attempts + 1 >= MAX_ATTEMPTS {
        FailureAction::GiveUp
    } else {
        FailureAction::Retry
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Applied,
    // Outro worker reivindicou o evento antes
    AlreadyProcessed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub failed: usize,
    pub abandoned: usize,
    // Eventos posteriores de uma entidade que falhou nesta drenagem
    pub deferred: usize,
}

/// Persistência da fila de eventos.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    async fn pending_after(&self, after_id: i64, limit: i64) -> Result<Vec<EntityChange>, AppError>;
    async fn reject(&self, change_id: i64, reason: &str) -> Result<(), AppError>;
    async fn record_error(&self, change_id: i64, error: &str) -> Result<(), AppError>;
    async fn give_up(&self, change_id: i64, error: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, change: &EntityChange) -> Result<Handled, AppError>;
}

// O texto gravado em `last_error` precisa da causa, não só da categoria
fn error_detail(error: &AppError) -> String {
    match error {
        AppError::DatabaseError(inner) => format!("{}: {}", error, inner),
        AppError::InternalServerError(inner) => format!("{}: {:#}", error, inner),
        other => other.to_string(),
    }
}

/// Percorre a fila uma vez, em ordem de id. A ordem só é mantida por entidade:
/// depois de uma falha, os eventos seguintes da mesma linha esperam a próxima
/// drenagem e o restante da fila segue.
pub async fn drain_changes<S, H>(store: &S, handler: &H) -> Result<DrainReport, AppError>
where
    S: ChangeStore + ?Sized,
    H: ChangeHandler + ?Sized,
{
    let mut report = DrainReport::default();
    let mut blocked: HashSet<(String, Uuid)> = HashSet::new();
    let mut cursor = 0;

    loop {
        let batch = store.pending_after(cursor, DRAIN_BATCH).await?;
        let fetched = batch.len();

        for change in batch {
            cursor = change.id;
            let key = (change.entity.clone(), change.entity_id);
            if blocked.contains(&key) {
                report.deferred += 1;
                continue;
            }

            match handler.handle(&change).await {
                Ok(Handled::Applied) => report.applied += 1,
                Ok(Handled::AlreadyProcessed) => report.duplicates += 1,
                Err(AppError::InvalidChange(reason)) => {
                    tracing::warn!(change_id = change.id, entity = %change.entity, "Evento rejeitado: {}", reason);
                    store.reject(change.id, &reason).await?;
                    report.rejected += 1;
                }
                Err(e) => {
                    let error = error_detail(&e);
                    match failure_action(change.attempts) {
                        FailureAction::Retry => {
                            tracing::error!(
                                change_id = change.id,
                                entity = %change.entity,
                                attempt = change.attempts + 1,
                                "❌ Falha ao aplicar evento: {}",
                                error
                            );
                            store.record_error(change.id, &error).await?;
                            blocked.insert(key);
                            report.failed += 1;
                        }
                        FailureAction::GiveUp => {
                            tracing::error!(
                                change_id = change.id,
                                entity = %change.entity,
                                attempts = change.attempts + 1,
                                "❌ Evento abandonado após falhas seguidas: {}",
                                error
                            );
                            store.give_up(change.id, &error).await?;
                            report.abandoned += 1;
                        }
                    }
                }
            }
        }

        if (fetched as i64) < DRAIN_BATCH {
            return Ok(report);
        }
    }
}

#[derive(Clone)]
pub struct PgChangeStore {
    pool: PgPool,
    changes: ChangeRepository,
}

impl PgChangeStore {
    pub fn new(pool: PgPool, changes: ChangeRepository) -> Self {
        Self { pool, changes }
    }
}

#[async_trait]
impl ChangeStore for PgChangeStore {
    async fn pending_after(&self, after_id: i64, limit: i64) -> Result<Vec<EntityChange>, AppError> {
        self.changes.list_pending(&self.pool, after_id, limit).await
    }

    async fn reject(&self, change_id: i64, reason: &str) -> Result<(), AppError> {
        self.changes.mark_rejected(&self.pool, change_id, reason).await
    }

    async fn record_error(&self, change_id: i64, error: &str) -> Result<(), AppError> {
        self.changes.record_error(&self.pool, change_id, error).await
    }

    async fn give_up(&self, change_id: i64, error: &str) -> Result<(), AppError> {
        self.changes.give_up(&self.pool, change_id, error).await
    }
}

// =========================================================================
//  WORKER
// =========================================================================

#[derive(Clone)]
pub struct ChangeFeedWorker {
    pool: PgPool,
    store: PgChangeStore,
    aggregator: SummaryAggregator,
    enrollments: EnrollmentService,
    poll_interval: Duration,
}

impl ChangeFeedWorker {
    pub fn new(
        pool: PgPool,
        changes: ChangeRepository,
        aggregator: SummaryAggregator,
        enrollments: EnrollmentService,
        poll_interval: Duration,
    ) -> Self {
        let store = PgChangeStore::new(pool.clone(), changes);
        Self { pool, store, aggregator, enrollments, poll_interval }
    }

    async fn listen(&self) -> Option<PgListener> {
        let mut listener = match PgListener::connect_with(&self.pool).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::warn!("LISTEN indisponível, seguindo só com polling: {}", e);
                return None;
            }
        };
        if let Err(e) = listener.listen(CHANNEL).await {
            tracing::warn!("LISTEN indisponível, seguindo só com polling: {}", e);
            return None;
        }
        Some(listener)
    }

    /// Laço principal: drena, espera notificação ou o intervalo, repete.
    pub async fn run(self) {
        let mut listener = self.listen().await;
        tracing::info!(channel = CHANNEL, listening = listener.is_some(), "📡 Feed de alterações iniciado");

        loop {
            match self.drain().await {
                Ok(report) if report != DrainReport::default() => {
                    tracing::info!(
                        applied = report.applied,
                        duplicates = report.duplicates,
                        rejected = report.rejected,
                        failed = report.failed,
                        abandoned = report.abandoned,
                        deferred = report.deferred,
                        "Feed drenado"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("❌ Falha ao drenar o feed: {}", e),
            }

            let lost = match listener.as_mut() {
                Some(listener) => tokio::select! {
                    received = listener.recv() => received.err(),
                    _ = tokio::time::sleep(self.poll_interval) => None,
                },
                None => {
                    tokio::time::sleep(self.poll_interval).await;
                    None
                }
            };

            if let Some(e) = lost {
                tracing::warn!("Conexão do LISTEN perdida, voltando ao polling: {}", e);
                listener = self.listen().await;
            }
        }
    }

    pub async fn drain(&self) -> Result<DrainReport, AppError> {
        drain_changes(&self.store, self).await
    }

    async fn process(&self, change: &EntityChange) -> Result<Handled, AppError> {
        let already_processed = match normalize(change)? {
            NormalizedChange::Sale(s) => {
                let (before, after) = s.pair();
                self.aggregator.apply_change(change.id, before, after).await?.already_processed
            }
            NormalizedChange::CashMovement(s) => {
                let (before, after) = s.pair();
                self.aggregator.apply_change(change.id, before, after).await?.already_processed
            }
            NormalizedChange::Attendance(s) => {
                let (before, after) = s.pair();
                self.aggregator
                    .apply_attendance_change(change.id, before, after)
                    .await?
                    .already_processed
            }
            NormalizedChange::Membership(s) => {
                let (before, after) = s.pair();
                self.aggregator.apply_change(change.id, before, after).await?.already_processed
            }
            NormalizedChange::Enrollment(s) => {
                let (before, after) = s.pair();
                let outcome = self.enrollments.apply_change(change.id, before, after, today_utc()).await?;
                tracing::debug!(
                    change_id = change.id,
                    classes = outcome.classes_updated,
                    sessions = outcome.session_adjustments,
                    "Contagens de matrícula atualizadas"
                );
                outcome.already_processed
            }
        };

        Ok(if already_processed { Handled::AlreadyProcessed } else { Handled::Applied })
    }
}

#[async_trait]
impl ChangeHandler for ChangeFeedWorker {
    async fn handle(&self, change: &EntityChange) -> Result<Handled, AppError> {
        self.process(change).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, sync::Mutex};

    use chrono::{NaiveDate, Utc};
    use serde_json::json;

    use crate::models::{enrollment::EnrollmentStatus, finance::SaleStatus};

    fn change(entity: &str, before: Option<Value>, after: Option<Value>) -> EntityChange {
        EntityChange {
            id: 42,
            event_id: Uuid::new_v4(),
            entity: entity.to_string(),
            entity_id: Uuid::new_v4(),
            before,
            after,
            created_at: Utc::now(),
            attempts: 0,
        }
    }

    fn sale_row(status: &str, total: i64) -> Value {
        json!({
            "id": "8d5b8a3c-5f0e-4a8e-9a51-6d6f8d5c2b11",
            "tenant_id": "1f6a3c2e-4b5d-4e6f-8a9b-0c1d2e3f4a5b",
            "branch_id": "2a7b4d3f-5c6e-4f70-9b8c-1d2e3f4a5b6c",
            "client_id": null,
            "sale_date": "2024-03-15",
            "status": status,
            "total_cents": total,
            "paid_cents": total,
            "discount_cents": 0,
            "created_at": "2024-03-15T10:00:00+00:00",
            "updated_at": "2024-03-15T10:00:00+00:00"
        })
    }

    #[test]
    fn insert_event_has_only_after() {
        let normalized = normalize(&change("sale", None, Some(sale_row("paid", 5000)))).unwrap();
        let NormalizedChange::Sale(s) = normalized else {
            panic!("esperava venda");
        };
        assert!(s.before.is_none());
        let after = s.after.unwrap();
        assert_eq!(after.total_cents, 5000);
        assert_eq!(after.status, SaleStatus::Paid);
        assert_eq!(after.sale_date, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    }

    #[test]
    fn update_event_carries_both_snapshots() {
        let normalized = normalize(&change(
            "sale",
            Some(sale_row("paid", 5000)),
            Some(sale_row("canceled", 5000)),
        ))
        .unwrap();
        let NormalizedChange::Sale(s) = normalized else {
            panic!("esperava venda");
        };
        assert_eq!(s.before.unwrap().status, SaleStatus::Paid);
        assert_eq!(s.after.unwrap().status, SaleStatus::Canceled);
    }

    #[test]
    fn enrollment_snapshot_with_open_window() {
        let row = json!({
            "id": "3b8c5e4a-6d7f-4081-8c9d-2e3f4a5b6c7d",
            "tenant_id": "1f6a3c2e-4b5d-4e6f-8a9b-0c1d2e3f4a5b",
            "branch_id": "2a7b4d3f-5c6e-4f70-9b8c-1d2e3f4a5b6c",
            "client_id": "4c9d6f5b-7e80-4192-9dae-3f4a5b6c7d8e",
            "class_id": "5dae7a6c-8f91-42a3-aebf-4a5b6c7d8e9f",
            "membership_id": null,
            "status": "active",
            "effective_from": "2024-03-01",
            "effective_to": null
        });
        let NormalizedChange::Enrollment(s) = normalize(&change("enrollment", None, Some(row))).unwrap() else {
            panic!("esperava matrícula");
        };
        let after = s.after.unwrap();
        assert_eq!(after.status, EnrollmentStatus::Active);
        assert!(after.effective_to.is_none());
    }

    #[test]
    fn unknown_entity_is_rejected() {
        let err = normalize(&change("locker", None, Some(json!({})))).unwrap_err();
        assert!(matches!(err, AppError::InvalidChange(_)));
    }

    #[test]
    fn malformed_snapshot_is_rejected() {
        let err = normalize(&change("sale", None, Some(json!({ "id": "not-a-uuid" })))).unwrap_err();
        assert!(matches!(err, AppError::InvalidChange(_)));
    }

    #[test]
    fn event_without_snapshots_is_rejected() {
        let err = normalize(&change("attendance", None, Some(Value::Null))).unwrap_err();
        assert!(matches!(err, AppError::InvalidChange(_)));
    }

    // Fila em memória com o mesmo contrato da tabela `entity_changes`
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<(EntityChange, bool, Option<String>)>>,
    }

    impl MemoryStore {
        fn with(changes: Vec<EntityChange>) -> Self {
            Self { rows: Mutex::new(changes.into_iter().map(|c| (c, false, None)).collect()) }
        }

        fn update(&self, id: i64, f: impl FnOnce(&mut (EntityChange, bool, Option<String>))) {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|(c, _, _)| c.id == id) {
                f(row);
            }
        }

        fn pending_ids(&self) -> Vec<i64> {
            self.rows.lock().unwrap().iter().filter(|(_, done, _)| !done).map(|(c, _, _)| c.id).collect()
        }
    }

    #[async_trait]
    impl ChangeStore for MemoryStore {
        async fn pending_after(&self, after_id: i64, limit: i64) -> Result<Vec<EntityChange>, AppError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows
                .iter()
                .filter(|(c, done, _)| !done && c.id > after_id)
                .take(limit as usize)
                .map(|(c, _, _)| c.clone())
                .collect())
        }

        async fn reject(&self, change_id: i64, reason: &str) -> Result<(), AppError> {
            self.update(change_id, |row| {
                row.1 = true;
                row.2 = Some(reason.to_string());
            });
            Ok(())
        }

        async fn record_error(&self, change_id: i64, error: &str) -> Result<(), AppError> {
            self.update(change_id, |row| {
                row.0.attempts += 1;
                row.2 = Some(error.to_string());
            });
            Ok(())
        }

        async fn give_up(&self, change_id: i64, error: &str) -> Result<(), AppError> {
            self.update(change_id, |row| {
                row.0.attempts += 1;
                row.1 = true;
                row.2 = Some(error.to_string());
            });
            Ok(())
        }
    }

    // Aplica tudo, exceto as entidades "envenenadas"; registra a ordem vista
    #[derive(Default)]
    struct ScriptedHandler {
        poisoned: HashSet<Uuid>,
        duplicates: HashSet<i64>,
        seen: Mutex<Vec<i64>>,
        applied: Mutex<HashMap<Uuid, usize>>,
    }

    #[async_trait]
    impl ChangeHandler for ScriptedHandler {
        async fn handle(&self, change: &EntityChange) -> Result<Handled, AppError> {
            self.seen.lock().unwrap().push(change.id);
            if self.poisoned.contains(&change.entity_id) {
                return Err(AppError::DatabaseError(sqlx::Error::Protocol("figures malformado".into())));
            }
            if self.duplicates.contains(&change.id) {
                return Ok(Handled::AlreadyProcessed);
            }
            *self.applied.lock().unwrap().entry(change.entity_id).or_default() += 1;
            Ok(Handled::Applied)
        }
    }

    fn event(id: i64, entity_id: Uuid) -> EntityChange {
        let mut c = change("sale", None, Some(sale_row("paid", 100)));
        c.id = id;
        c.entity_id = entity_id;
        c
    }

    const SALE_A: Uuid = Uuid::from_u128(0xA1);
    const SALE_B: Uuid = Uuid::from_u128(0xB1);

    #[test]
    fn gives_up_on_the_last_allowed_attempt() {
        assert_eq!(failure_action(0), FailureAction::Retry);
        assert_eq!(failure_action(MAX_ATTEMPTS - 2), FailureAction::Retry);
        assert_eq!(failure_action(MAX_ATTEMPTS - 1), FailureAction::GiveUp);
    }

    #[tokio::test]
    async fn failing_event_does_not_hold_back_other_tenants() {
        let store = MemoryStore::with(vec![event(1, SALE_A), event(2, SALE_B)]);
        let handler = ScriptedHandler { poisoned: HashSet::from([SALE_A]), ..Default::default() };

        let report = drain_changes(&store, &handler).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(handler.applied.lock().unwrap().get(&SALE_B), Some(&1));
        assert_eq!(store.pending_ids(), vec![1]);
    }

    #[tokio::test]
    async fn poisoned_event_leaves_the_queue_after_max_attempts() {
        let store = MemoryStore::with(vec![event(1, SALE_A)]);
        let handler = ScriptedHandler { poisoned: HashSet::from([SALE_A]), ..Default::default() };

        for _ in 1..MAX_ATTEMPTS {
            let report = drain_changes(&store, &handler).await.unwrap();
            assert_eq!(report.failed, 1);
        }
        let last = drain_changes(&store, &handler).await.unwrap();
        assert_eq!(last.abandoned, 1);
        assert!(store.pending_ids().is_empty());

        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[0].0.attempts, MAX_ATTEMPTS);
        assert!(rows[0].2.as_deref().is_some_and(|e| e.contains("figures malformado")));
    }

    #[tokio::test]
    async fn later_events_of_a_failed_entity_wait_their_turn() {
        let store = MemoryStore::with(vec![event(1, SALE_A), event(2, SALE_A), event(3, SALE_B)]);
        let handler = ScriptedHandler { poisoned: HashSet::from([SALE_A]), ..Default::default() };

        let report = drain_changes(&store, &handler).await.unwrap();

        assert_eq!(report.deferred, 1);
        assert_eq!(*handler.seen.lock().unwrap(), vec![1, 3]);
        assert_eq!(store.pending_ids(), vec![1, 2]);
    }

    #[tokio::test]
    async fn duplicate_claim_is_not_a_failure() {
        let store = MemoryStore::with(vec![event(1, SALE_A)]);
        let handler = ScriptedHandler { duplicates: HashSet::from([1]), ..Default::default() };

        let report = drain_changes(&store, &handler).await.unwrap();

        assert_eq!(report, DrainReport { duplicates: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn malformed_event_is_rejected_without_retry() {
        let mut bad = change("locker", None, Some(json!({})));
        bad.id = 7;
        let store = MemoryStore::with(vec![bad]);

        struct Normalizing;
        #[async_trait]
        impl ChangeHandler for Normalizing {
            async fn handle(&self, change: &EntityChange) -> Result<Handled, AppError> {
                normalize(change).map(|_| Handled::Applied)
            }
        }

        let report = drain_changes(&store, &Normalizing).await.unwrap();
        assert_eq!(report.rejected, 1);
        assert!(store.pending_ids().is_empty());
    }
}
