// src/services/membership_admin.rs
//
// Operações manuais sobre um contrato: trancamento, cancelamento e ajuste de
// dias. Cada uma roda em uma transação própria, com a linha travada, e deixa
// um registro na trilha de auditoria.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    common::{dates::add_days, error::AppError},
    db::{EnrollmentRepository, FinanceRepository, MembershipRepository},
    models::membership::{AdjustmentKind, Membership, MembershipStatus, NewAdjustment, Plan},
};

// =========================================================================
//  REGRAS (puras)
// =========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspensionRequest {
    pub start_date: NaiveDate,
    pub days: i32,
}

/// Valida o trancamento e devolve o contrato já com a janela aplicada.
pub fn plan_suspension(
    membership: &Membership,
    plan: &Plan,
    request: SuspensionRequest,
    today: NaiveDate,
) -> Result<Membership, AppError> {
    if membership.status != MembershipStatus::Active {
        return Err(AppError::BusinessRule("membership_not_active"));
    }
    if !plan.allow_freeze {
        return Err(AppError::BusinessRule("contract_freeze_not_allowed"));
    }
    if request.days < plan.min_suspension_days.max(1) {
        return Err(AppError::BusinessRule("suspension_too_short"));
    }
    if plan.max_suspension_count > 0 && membership.suspension_count >= plan.max_suspension_count {
        return Err(AppError::BusinessRule("suspension_count_exceeded"));
    }
    if plan.max_suspension_days > 0 && membership.suspension_days_used + request.days > plan.max_suspension_days {
        return Err(AppError::BusinessRule("suspension_days_exceeded"));
    }
    let end_at = membership.end_at.ok_or(AppError::BusinessRule("membership_without_end_date"))?;
    if request.start_date < membership.start_at || request.start_date > end_at {
        return Err(AppError::BusinessRule("suspension_outside_contract"));
    }

    let days = request.days as i64;
    let mut updated = membership.clone();
    updated.pause_started_at = Some(request.start_date);
    updated.pause_until = Some(add_days(request.start_date, days - 1));
    updated.end_at = Some(add_days(end_at, days));
    updated.suspension_count += 1;
    updated.suspension_days_used += request.days;
    if request.start_date <= today {
        updated.status = MembershipStatus::Paused;
    }
    Ok(updated)
}

/// Novo término e status após somar/subtrair `days`.
pub fn plan_days_adjustment(
    membership: &Membership,
    days: i32,
    today: NaiveDate,
) -> Result<(NaiveDate, MembershipStatus), AppError> {
    if days == 0 {
        return Err(AppError::BusinessRule("invalid_days_adjustment"));
    }
    if membership.status == MembershipStatus::Canceled {
        return Err(AppError::BusinessRule("membership_already_canceled"));
    }
    let end_at = membership.end_at.ok_or(AppError::BusinessRule("membership_without_end_date"))?;
    let new_end = add_days(end_at, days as i64);
    if new_end < membership.start_at {
        return Err(AppError::BusinessRule("adjustment_before_start"));
    }

    let status = if membership.status == MembershipStatus::Expired && new_end >= today {
        MembershipStatus::Active
    } else {
        membership.status
    };
    Ok((new_end, status))
}

pub fn check_cancelable(membership: &Membership) -> Result<(), AppError> {
    if membership.status == MembershipStatus::Canceled {
        return Err(AppError::BusinessRule("membership_already_canceled"));
    }
    Ok(())
}

// =========================================================================
//  RESULTADOS
// =========================================================================

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentResult {
    pub membership_id: Uuid,
    pub status: MembershipStatus,
    #[schema(value_type = Option<String>, format = Date)]
    pub end_at: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub pause_started_at: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub pause_until: Option<NaiveDate>,
    pub audit_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelResult {
    pub membership_id: Uuid,
    pub receivables_canceled: u64,
    pub movements_reversed: u64,
    pub enrollments_deactivated: u64,
}

// =========================================================================
//  SERVIÇO
// =========================================================================

#[derive(Clone)]
pub struct MembershipAdminService {
    pool: PgPool,
    memberships: MembershipRepository,
    finance: FinanceRepository,
    enrollments: EnrollmentRepository,
}

impl MembershipAdminService {
    pub fn new(
        pool: PgPool,
        memberships: MembershipRepository,
        finance: FinanceRepository,
        enrollments: EnrollmentRepository,
    ) -> Self {
        Self { pool, memberships, finance, enrollments }
    }

    pub async fn suspend(
        &self,
        tenant_id: Uuid,
        membership_id: Uuid,
        request: SuspensionRequest,
        reason: Option<String>,
        performed_by: Uuid,
        today: NaiveDate,
    ) -> Result<AdjustmentResult, AppError> {
        let mut tx = self.pool.begin().await?;

        let membership = self
            .memberships
            .find_for_update(&mut *tx, tenant_id, membership_id)
            .await?
            .ok_or(AppError::NotFound("membership_not_found"))?;
        let plan = self
            .memberships
            .find_plan(&mut *tx, tenant_id, membership.plan_id)
            .await?
            .ok_or(AppError::NotFound("plan_not_found"))?;

        let updated = plan_suspension(&membership, &plan, request, today)?;
        self.memberships.apply_suspension(&mut *tx, &updated).await?;

        let audit_id = self
            .memberships
            .insert_adjustment(
                &mut *tx,
                &NewAdjustment {
                    tenant_id,
                    membership_id,
                    kind: AdjustmentKind::Suspension,
                    days: request.days,
                    previous_end_at: membership.end_at,
                    new_end_at: updated.end_at,
                    reason,
                    performed_by: Some(performed_by),
                },
            )
            .await?;

        tx.commit().await?;
        tracing::info!(%tenant_id, %membership_id, days = request.days, "Contrato trancado");

        Ok(AdjustmentResult {
            membership_id,
            status: updated.status,
            end_at: updated.end_at,
            pause_started_at: updated.pause_started_at,
            pause_until: updated.pause_until,
            audit_id,
        })
    }

    pub async fn adjust_days(
        &self,
        tenant_id: Uuid,
        membership_id: Uuid,
        days: i32,
        reason: String,
        performed_by: Uuid,
        today: NaiveDate,
    ) -> Result<AdjustmentResult, AppError> {
        let mut tx = self.pool.begin().await?;

        let membership = self
            .memberships
            .find_for_update(&mut *tx, tenant_id, membership_id)
            .await?
            .ok_or(AppError::NotFound("membership_not_found"))?;

        let (new_end, status) = plan_days_adjustment(&membership, days, today)?;
        self.memberships.update_end_and_status(&mut *tx, membership_id, new_end, status).await?;

        let audit_id = self
            .memberships
            .insert_adjustment(
                &mut *tx,
                &NewAdjustment {
                    tenant_id,
                    membership_id,
                    kind: AdjustmentKind::DaysAdjustment,
                    days,
                    previous_end_at: membership.end_at,
                    new_end_at: Some(new_end),
                    reason: Some(reason),
                    performed_by: Some(performed_by),
                },
            )
            .await?;

        tx.commit().await?;
        tracing::info!(%tenant_id, %membership_id, days, "Dias do contrato ajustados");

        Ok(AdjustmentResult {
            membership_id,
            status,
            end_at: Some(new_end),
            pause_started_at: membership.pause_started_at,
            pause_until: membership.pause_until,
            audit_id,
        })
    }

    /// Cancelamento completo. Também usado pela automação de inadimplência
    /// (sem `performed_by`).
    pub async fn cancel(
        &self,
        tenant_id: Uuid,
        membership_id: Uuid,
        reason: Option<String>,
        performed_by: Option<Uuid>,
        today: NaiveDate,
    ) -> Result<CancelResult, AppError> {
        let mut tx = self.pool.begin().await?;

        let membership = self
            .memberships
            .find_for_update(&mut *tx, tenant_id, membership_id)
            .await?
            .ok_or(AppError::NotFound("membership_not_found"))?;
        check_cancelable(&membership)?;

        self.memberships.mark_canceled(&mut *tx, membership_id, today).await?;
        self.memberships.detach_from_client(&mut *tx, membership.client_id, membership_id).await?;
        let receivables_canceled = self.finance.cancel_open_for_membership(&mut *tx, membership_id).await?;
        let movements_reversed = self.finance.reverse_anticipated_movements(&mut *tx, membership_id).await?;
        // As contagens de turma/sessão caem pelo feed de alterações das matrículas
        let enrollments_deactivated = self
            .enrollments
            .deactivate_for_membership(&mut *tx, membership_id, today)
            .await?;

        self.memberships
            .insert_adjustment(
                &mut *tx,
                &NewAdjustment {
                    tenant_id,
                    membership_id,
                    kind: AdjustmentKind::Cancellation,
                    days: 0,
                    previous_end_at: membership.end_at,
                    new_end_at: membership.end_at,
                    reason,
                    performed_by,
                },
            )
            .await?;

        tx.commit().await?;
        tracing::info!(
            %tenant_id,
            %membership_id,
            receivables_canceled,
            movements_reversed,
            enrollments_deactivated,
            "Contrato cancelado"
        );

        Ok(CancelResult { membership_id, receivables_canceled, movements_reversed, enrollments_deactivated })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::dates::parse_date_key, models::membership::DurationType};

    fn d(raw: &str) -> NaiveDate {
        parse_date_key(raw).unwrap()
    }

    fn membership(status: MembershipStatus) -> Membership {
        Membership {
            id: Uuid::from_u128(1),
            tenant_id: Uuid::from_u128(0xA),
            branch_id: Uuid::from_u128(0xB),
            client_id: Uuid::from_u128(2),
            plan_id: Uuid::from_u128(3),
            status,
            start_at: d("2024-03-01"),
            end_at: Some(d("2024-03-31")),
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

    fn plan() -> Plan {
        Plan {
            id: Uuid::from_u128(3),
            tenant_id: Uuid::from_u128(0xA),
            name: "Mensal".into(),
            duration_type: DurationType::Month,
            duration: 1,
            allow_freeze: true,
            max_suspension_count: 2,
            max_suspension_days: 10,
            min_suspension_days: 3,
            class_ids: vec![],
        }
    }

    fn request(start: &str, days: i32) -> SuspensionRequest {
        SuspensionRequest { start_date: d(start), days }
    }

    fn rule(result: Result<impl std::fmt::Debug, AppError>) -> &'static str {
        match result {
            Err(AppError::BusinessRule(code)) => code,
            other => panic!("esperava regra de negócio, veio {:?}", other),
        }
    }

    #[test]
    fn suspension_extends_the_contract_and_pauses_when_started() {
        let m = membership(MembershipStatus::Active);
        let updated = plan_suspension(&m, &plan(), request("2024-03-10", 5), d("2024-03-10")).unwrap();
        assert_eq!(updated.status, MembershipStatus::Paused);
        assert_eq!(updated.pause_started_at, Some(d("2024-03-10")));
        assert_eq!(updated.pause_until, Some(d("2024-03-14")));
        assert_eq!(updated.end_at, Some(d("2024-04-05")));
        assert_eq!((updated.suspension_count, updated.suspension_days_used), (1, 5));

        // Agendado para o futuro: continua ativo até a janela começar
        let scheduled = plan_suspension(&m, &plan(), request("2024-03-20", 5), d("2024-03-10")).unwrap();
        assert_eq!(scheduled.status, MembershipStatus::Active);
    }

    #[test]
    fn suspension_rules_are_enforced() {
        let active = membership(MembershipStatus::Active);
        let today = d("2024-03-10");

        assert_eq!(
            rule(plan_suspension(&membership(MembershipStatus::Paused), &plan(), request("2024-03-10", 5), today)),
            "membership_not_active"
        );
        let mut no_freeze = plan();
        no_freeze.allow_freeze = false;
        assert_eq!(rule(plan_suspension(&active, &no_freeze, request("2024-03-10", 5), today)), "contract_freeze_not_allowed");
        assert_eq!(rule(plan_suspension(&active, &plan(), request("2024-03-10", 2), today)), "suspension_too_short");
        assert_eq!(rule(plan_suspension(&active, &plan(), request("2024-03-10", 11), today)), "suspension_days_exceeded");
        assert_eq!(rule(plan_suspension(&active, &plan(), request("2024-04-10", 5), today)), "suspension_outside_contract");

        let mut used = active.clone();
        used.suspension_count = 2;
        assert_eq!(rule(plan_suspension(&used, &plan(), request("2024-03-10", 5), today)), "suspension_count_exceeded");

        let mut open_ended = active.clone();
        open_ended.end_at = None;
        assert_eq!(rule(plan_suspension(&open_ended, &plan(), request("2024-03-10", 5), today)), "membership_without_end_date");
    }

    #[test]
    fn zero_limits_mean_unlimited() {
        let mut unlimited = plan();
        unlimited.max_suspension_count = 0;
        unlimited.max_suspension_days = 0;
        let mut m = membership(MembershipStatus::Active);
        m.suspension_count = 50;
        m.suspension_days_used = 500;
        assert!(plan_suspension(&m, &unlimited, request("2024-03-10", 30), d("2024-03-10")).is_ok());
    }

    #[test]
    fn days_adjustment_rules() {
        let today = d("2024-04-05");
        let active = membership(MembershipStatus::Active);

        assert_eq!(plan_days_adjustment(&active, 7, today).unwrap(), (d("2024-04-07"), MembershipStatus::Active));
        assert_eq!(rule(plan_days_adjustment(&active, 0, today)), "invalid_days_adjustment");
        assert_eq!(rule(plan_days_adjustment(&active, -40, today)), "adjustment_before_start");
        assert_eq!(
            rule(plan_days_adjustment(&membership(MembershipStatus::Canceled), 5, today)),
            "membership_already_canceled"
        );

        // Expirado volta a ativo se o novo término alcança hoje
        let expired = membership(MembershipStatus::Expired);
        assert_eq!(plan_days_adjustment(&expired, 10, today).unwrap().1, MembershipStatus::Active);
        assert_eq!(plan_days_adjustment(&expired, 2, today).unwrap().1, MembershipStatus::Expired);
    }

    #[test]
    fn canceled_membership_cannot_be_canceled_again() {
        assert!(check_cancelable(&membership(MembershipStatus::Active)).is_ok());
        assert_eq!(rule(check_cancelable(&membership(MembershipStatus::Canceled))), "membership_already_canceled");
    }
}
