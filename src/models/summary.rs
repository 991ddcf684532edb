// src/models/summary.rs
//
// Documento agregado (resumo diário/mensal). É uma estrutura aninhada de
// contadores independentes; o mesmo tipo serve de "delta" a ser somado.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SalesFigures {
    pub count: i64,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub discount_cents: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CashFigures {
    pub inflow_count: i64,
    pub inflow_cents: i64,
    pub outflow_count: i64,
    pub outflow_cents: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AttendanceFigures {
    pub present: i64,
    pub absent: i64,
    // Histograma de presenças por hora do dia (`attendance.byHour.<h>`)
    pub by_hour: BTreeMap<u8, i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MembershipFigures {
    pub new: i64,
    pub renewals: i64,
    pub canceled: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SummaryFigures {
    pub sales: SalesFigures,
    pub cash_movements: CashFigures,
    pub attendance: AttendanceFigures,
    pub memberships: MembershipFigures,
}

impl SalesFigures {
    fn merge(&mut self, o: &Self) {
        self.count += o.count;
        self.total_cents += o.total_cents;
        self.paid_cents += o.paid_cents;
        self.discount_cents += o.discount_cents;
    }
}

impl CashFigures {
    fn merge(&mut self, o: &Self) {
        self.inflow_count += o.inflow_count;
        self.inflow_cents += o.inflow_cents;
        self.outflow_count += o.outflow_count;
        self.outflow_cents += o.outflow_cents;
    }
}

impl AttendanceFigures {
    pub fn merge(&mut self, o: &Self) {
        self.present += o.present;
        self.absent += o.absent;
        for (hour, value) in &o.by_hour {
            *self.by_hour.entry(*hour).or_insert(0) += value;
        }
        self.by_hour.retain(|_, v| *v != 0);
    }

    pub fn negated(&self) -> Self {
        Self {
            present: -self.present,
            absent: -self.absent,
            by_hour: self.by_hour.iter().map(|(h, v)| (*h, -v)).collect(),
        }
    }
}

impl MembershipFigures {
    fn merge(&mut self, o: &Self) {
        self.new += o.new;
        self.renewals += o.renewals;
        self.canceled += o.canceled;
    }
}

impl SummaryFigures {
    /// Soma campo a campo (é assim que um delta é aplicado ao documento).
    pub fn merge(&mut self, other: &SummaryFigures) {
        self.sales.merge(&other.sales);
        self.cash_movements.merge(&other.cash_movements);
        self.attendance.merge(&other.attendance);
        self.memberships.merge(&other.memberships);
    }

    pub fn negated(&self) -> SummaryFigures {
        let s = &self.sales;
        let c = &self.cash_movements;
        let m = &self.memberships;
        SummaryFigures {
            sales: SalesFigures {
                count: -s.count,
                total_cents: -s.total_cents,
                paid_cents: -s.paid_cents,
                discount_cents: -s.discount_cents,
            },
            cash_movements: CashFigures {
                inflow_count: -c.inflow_count,
                inflow_cents: -c.inflow_cents,
                outflow_count: -c.outflow_count,
                outflow_cents: -c.outflow_cents,
            },
            attendance: self.attendance.negated(),
            memberships: MembershipFigures {
                new: -m.new,
                renewals: -m.renewals,
                canceled: -m.canceled,
            },
        }
    }

    pub fn is_zero(&self) -> bool {
        self == &SummaryFigures::default()
    }
}

/// Documento alvo de um delta.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "scope", rename_all = "camelCase")]
pub enum SummaryTarget {
    #[serde(rename_all = "camelCase")]
    Daily { tenant_id: Uuid, branch_id: Uuid, date: NaiveDate },
    #[serde(rename_all = "camelCase")]
    Monthly { tenant_id: Uuid, branch_id: Uuid, month: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn figures() -> SummaryFigures {
        let mut f = SummaryFigures::default();
        f.sales.count = 1;
        f.sales.total_cents = 5000;
        f.attendance.present = 2;
        f.attendance.by_hour.insert(7, 2);
        f.memberships.renewals = 1;
        f
    }

    #[test]
    fn merging_the_negation_cancels_out() {
        let mut f = figures();
        f.merge(&figures().negated());
        assert!(f.is_zero());
        assert!(f.attendance.by_hour.is_empty());
    }

    #[test]
    fn missing_fields_deserialize_as_zero() {
        let raw = serde_json::json!({ "sales": { "count": 3 }, "attendance": { "byHour": { "18": 4 } } });
        let f: SummaryFigures = serde_json::from_value(raw).unwrap();
        assert_eq!(f.sales.count, 3);
        assert_eq!(f.sales.total_cents, 0);
        assert_eq!(f.attendance.by_hour.get(&18), Some(&4));
        assert_eq!(f.memberships, MembershipFigures::default());
    }

    #[test]
    fn serializes_hour_buckets_under_by_hour() {
        let value = serde_json::to_value(figures()).unwrap();
        assert_eq!(value["attendance"]["byHour"]["7"], 2);
        assert_eq!(value["cashMovements"]["inflowCents"], 0);
    }
}
