// src/models/attendance.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// Marcação de presença/falta de um aluno
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct AttendanceMark {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub client_id: Uuid,
    pub session_id: Option<Uuid>,
    pub attendance_date: NaiveDate,
    pub hour: i16,
    pub present: bool,
}
