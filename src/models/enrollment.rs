// src/models/enrollment.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "enrollment_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Active,
    Inactive,
}

/// Janela de vigência `[from, to]`; `to` ausente = sem limite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    pub from: NaiveDate,
    pub to: Option<NaiveDate>,
}

impl ValidityWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.from <= date && self.to.is_none_or(|to| date <= to)
    }
}

// Matrícula de um aluno em uma turma recorrente
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Enrollment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub client_id: Uuid,
    pub class_id: Uuid,
    pub membership_id: Option<Uuid>,
    pub status: EnrollmentStatus,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl Enrollment {
    /// Janela efetiva: vazia (None) quando a matrícula está inativa.
    pub fn effective_window(&self) -> Option<ValidityWindow> {
        match self.status {
            EnrollmentStatus::Active => Some(ValidityWindow {
                from: self.effective_from,
                to: self.effective_to,
            }),
            EnrollmentStatus::Inactive => None,
        }
    }

    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.effective_window().is_some_and(|w| w.contains(date))
    }
}

// Uma ocorrência datada da turma, com contagem própria
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ClassSession {
    pub id: Uuid,
    pub class_id: Uuid,
    pub session_date: NaiveDate,
    pub enrolled_count: i64,
}
