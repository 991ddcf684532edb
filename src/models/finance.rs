// src/models/finance.rs

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// --- Enums (Mapeando o Postgres) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sale_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SaleStatus {
    Open,
    Paid,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "cash_movement_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CashMovementKind {
    Inflow,  // Entrada
    Outflow, // Saída
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "receivable_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReceivableStatus {
    Pending,  // Aberto
    Overdue,  // Vencido
    Paid,     // Quitado
    Canceled, // Cancelado
}

impl ReceivableStatus {
    pub fn is_open(self) -> bool {
        matches!(self, ReceivableStatus::Pending | ReceivableStatus::Overdue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "receivable_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReceivableKind {
    Sale,   // Gerado por uma venda
    Manual, // Lançado manualmente pela equipe
}

// --- Structs ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Sale {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub client_id: Option<Uuid>,
    pub sale_date: NaiveDate,
    pub status: SaleStatus,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub discount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct CashMovement {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub membership_id: Option<Uuid>,
    pub movement_date: NaiveDate,
    pub kind: CashMovementKind,
    pub amount_cents: i64,
    // Lançamento antecipado (ex: parcelas futuras de um contrato)
    pub anticipated: bool,
    // Estornado: deixa de contar nos resumos
    pub reversed: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct CashierSession {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct Receivable {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub branch_id: Uuid,
    pub sale_id: Option<Uuid>,
    pub membership_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub kind: ReceivableKind,
    pub status: ReceivableStatus,
    pub due_date: NaiveDate,
    pub amount_cents: i64,
    pub amount_paid_cents: i64,
    pub consultant_user_id: Option<Uuid>,
    pub description: Option<String>,
}

impl Receivable {
    /// Saldo em aberto, nunca negativo.
    pub fn outstanding_cents(&self) -> i64 {
        (self.amount_cents - self.amount_paid_cents).max(0)
    }
}

/// Formata centavos como `R$ 1.234,56`.
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    let reais = (abs / 100).to_string();
    let mut grouped = String::new();
    for (i, ch) in reais.chars().enumerate() {
        if i > 0 && (reais.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    format!("{}R$ {},{:02}", sign, grouped, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_brazilian_currency() {
        assert_eq!(format_brl(0), "R$ 0,00");
        assert_eq!(format_brl(5), "R$ 0,05");
        assert_eq!(format_brl(123456), "R$ 1.234,56");
        assert_eq!(format_brl(100000000), "R$ 1.000.000,00");
        assert_eq!(format_brl(-1050), "-R$ 10,50");
    }
}
