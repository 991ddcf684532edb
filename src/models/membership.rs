// src/models/membership.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::dates::{add_days, add_months};

// --- Enums (Mapeando o Postgres) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "membership_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipStatus {
    Pending,
    Active,
    Paused,
    Expired,
    Canceled,
}

impl MembershipStatus {
    /// Ativa ou trancada: o contrato está "em curso".
    pub fn is_current(self) -> bool {
        matches!(self, MembershipStatus::Active | MembershipStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "duration_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DurationType {
    Day,
    Week,
    Month,
    Year,
}

impl DurationType {
    /// Término de um contrato de `duration` unidades que começa em `start`:
    /// início + N unidades - 1 dia. Durações menores que 1 contam como 1.
    pub fn end_date(self, start: NaiveDate, duration: i32) -> NaiveDate {
        let n = duration.max(1);
        let after = match self {
            DurationType::Day => add_days(start, n as i64),
            DurationType::Week => add_days(start, 7 * n as i64),
            DurationType::Month => add_months(start, n as u32),
            DurationType::Year => add_months(start, 12 * n as u32),
        };
        add_days(after, -1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "adjustment_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentKind {
    Suspension,
    DaysAdjustment,
    Cancellation,
}

// --- Structs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow, ToSchema)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Membership {
    pub id: Uuid,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub client_id: Uuid,
    pub plan_id: Uuid,
    pub status: MembershipStatus,
    #[schema(value_type = String, format = Date, example = "2024-03-01")]
    pub start_at: NaiveDate,
    #[schema(value_type = Option<String>, format = Date, example = "2024-03-31")]
    pub end_at: Option<NaiveDate>,
    pub duration_type: DurationType,
    pub duration: i32,
    #[schema(value_type = Option<String>, format = Date)]
    pub pause_started_at: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub pause_until: Option<NaiveDate>,
    pub suspension_count: i32,
    pub suspension_days_used: i32,
    pub previous_membership_id: Option<Uuid>,
    pub next_membership_id: Option<Uuid>,
    pub consultant_user_id: Option<Uuid>,
    #[schema(value_type = Option<String>, format = Date)]
    pub canceled_at: Option<NaiveDate>,
    pub allow_cross_branch_access: bool,
    pub allowed_branch_ids: Vec<Uuid>,
}

impl Membership {
    /// Dias de tolerância após o término. Contratos já encadeados a um sucessor não têm tolerância.
    pub fn grace_days(&self, inactive_after_renewal_days: i32) -> i64 {
        if self.next_membership_id.is_some() {
            0
        } else {
            inactive_after_renewal_days.max(0) as i64
        }
    }

    /// `start_at <= date <= end_at + grace` (sem limite superior quando não há término).
    pub fn covers(&self, date: NaiveDate, grace_days: i64) -> bool {
        if self.status == MembershipStatus::Canceled || self.start_at > date {
            return false;
        }
        match self.end_at {
            Some(end) => date <= add_days(end, grace_days),
            None => true,
        }
    }

    /// Já passou do término + tolerância?
    pub fn is_lapsed(&self, today: NaiveDate, grace_days: i64) -> bool {
        self.status != MembershipStatus::Canceled
            && self.end_at.is_some_and(|end| add_days(end, grace_days) < today)
    }

    /// O predecessor ainda "segura" o sucessor: em curso e sem término ou com término >= hoje.
    pub fn blocks_successor(&self, today: NaiveDate) -> bool {
        self.status.is_current() && self.end_at.is_none_or(|end| end >= today)
    }
}

/// Nova vigência de um sucessor pendente, para manter a corrente contígua.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reschedule {
    pub membership_id: Uuid,
    pub start_at: NaiveDate,
    pub end_at: NaiveDate,
}

/// Ativação de um contrato pendente, com os campos de acesso copiados para o aluno.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub membership_id: Uuid,
    pub client_id: Uuid,
    pub branch_id: Uuid,
    pub allow_cross_branch_access: bool,
    pub allowed_branch_ids: Vec<Uuid>,
}

// O "contrato" (plano) com a política de trancamento
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub duration_type: DurationType,
    pub duration: i32,
    pub allow_freeze: bool,
    /// 0 = ilimitado
    pub max_suspension_count: i32,
    /// 0 = ilimitado
    pub max_suspension_days: i32,
    pub min_suspension_days: i32,
    pub class_ids: Vec<Uuid>,
}

// Trilha de auditoria das alterações manuais
#[derive(Debug, Clone)]
pub struct NewAdjustment {
    pub tenant_id: Uuid,
    pub membership_id: Uuid,
    pub kind: AdjustmentKind,
    pub days: i32,
    pub previous_end_at: Option<NaiveDate>,
    pub new_end_at: Option<NaiveDate>,
    pub reason: Option<String>,
    pub performed_by: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::dates::parse_date_key;

    fn d(raw: &str) -> NaiveDate {
        parse_date_key(raw).unwrap()
    }

    #[test]
    fn end_dates_are_inclusive_of_the_last_day() {
        assert_eq!(DurationType::Day.end_date(d("2024-04-02"), 10), d("2024-04-11"));
        assert_eq!(DurationType::Week.end_date(d("2024-04-02"), 2), d("2024-04-15"));
        assert_eq!(DurationType::Month.end_date(d("2024-04-02"), 1), d("2024-05-01"));
        assert_eq!(DurationType::Month.end_date(d("2024-01-31"), 1), d("2024-02-28"));
        assert_eq!(DurationType::Year.end_date(d("2024-04-02"), 1), d("2025-04-01"));
        assert_eq!(DurationType::Day.end_date(d("2024-04-02"), 0), d("2024-04-02"));
    }
}
