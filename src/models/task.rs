// src/models/task.rs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::common::dates::date_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type, ToSchema)]
#[sqlx(type_name = "task_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Birthday,
    ContractDue,
    DebtDue,
}

impl TaskKind {
    pub fn prefix(self) -> &'static str {
        match self {
            TaskKind::Birthday => "birthday",
            TaskKind::ContractDue => "contract_due",
            TaskKind::DebtDue => "debt_due",
        }
    }
}

/// Identidade determinística `<tipo>_<origem>_<YYYY-MM-DD>`: a mesma tarefa
/// nunca é criada duas vezes para o mesmo dia.
pub fn task_id(kind: TaskKind, source_id: Uuid, date: NaiveDate) -> String {
    format!("{}_{}_{}", kind.prefix(), source_id, date_key(date))
}

// Tarefa planejada (ainda não gravada)
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub id: String,
    #[schema(ignore)]
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub kind: TaskKind,
    #[schema(value_type = String, format = Date)]
    pub date_key: NaiveDate,
    pub title: String,
    pub description: Option<String>,
    pub source_id: Uuid,
    pub client_id: Option<Uuid>,
    pub assigned_staff_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_deterministic() {
        let source = Uuid::nil();
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(
            task_id(TaskKind::Birthday, source, date),
            "birthday_00000000-0000-0000-0000-000000000000_2024-03-15"
        );
        assert_eq!(task_id(TaskKind::DebtDue, source, date), task_id(TaskKind::DebtDue, source, date));
        assert!(task_id(TaskKind::ContractDue, source, date).starts_with("contract_due_"));
    }
}
