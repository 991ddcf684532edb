// src/models/settings.rs

use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// Linha crua da tabela: qualquer campo pode estar ausente
#[derive(Debug, Clone, Default, FromRow)]
pub struct BranchAutomationSettingsRow {
    pub branch_id: Uuid,
    pub attendance_summary_at_midnight: Option<bool>,
    pub abandonment_risk_enabled: Option<bool>,
    pub abandonment_risk_days: Option<i32>,
    pub auto_close_cashier_at_midnight: Option<bool>,
    pub cancel_contracts_after_days_without_payment: Option<i32>,
    pub inactive_after_renewal_days: Option<i32>,
}

/// Configuração efetiva de automação de uma unidade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BranchAutomationSettings {
    pub attendance_summary_at_midnight: bool,
    pub abandonment_risk_enabled: bool,
    pub abandonment_risk_days: i32,
    pub auto_close_cashier_at_midnight: bool,
    /// 0 = desativado
    pub cancel_contracts_after_days_without_payment: i32,
    pub inactive_after_renewal_days: i32,
}

pub const DEFAULT_BRANCH_SETTINGS: BranchAutomationSettings = BranchAutomationSettings {
    attendance_summary_at_midnight: false,
    abandonment_risk_enabled: false,
    abandonment_risk_days: 0,
    auto_close_cashier_at_midnight: false,
    cancel_contracts_after_days_without_payment: 0,
    inactive_after_renewal_days: 0,
};

impl Default for BranchAutomationSettings {
    fn default() -> Self {
        DEFAULT_BRANCH_SETTINGS
    }
}

impl BranchAutomationSettings {
    /// Mescla campo a campo sobre os padrões. Limiares negativos viram 0.
    pub fn merged(row: Option<&BranchAutomationSettingsRow>) -> Self {
        let Some(row) = row else {
            return DEFAULT_BRANCH_SETTINGS;
        };
        let d = DEFAULT_BRANCH_SETTINGS;
        Self {
            attendance_summary_at_midnight: row
                .attendance_summary_at_midnight
                .unwrap_or(d.attendance_summary_at_midnight),
            abandonment_risk_enabled: row.abandonment_risk_enabled.unwrap_or(d.abandonment_risk_enabled),
            abandonment_risk_days: row.abandonment_risk_days.unwrap_or(d.abandonment_risk_days).max(0),
            auto_close_cashier_at_midnight: row
                .auto_close_cashier_at_midnight
                .unwrap_or(d.auto_close_cashier_at_midnight),
            cancel_contracts_after_days_without_payment: row
                .cancel_contracts_after_days_without_payment
                .unwrap_or(d.cancel_contracts_after_days_without_payment)
                .max(0),
            inactive_after_renewal_days: row
                .inactive_after_renewal_days
                .unwrap_or(d.inactive_after_renewal_days)
                .max(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_row_resolves_to_defaults() {
        assert_eq!(BranchAutomationSettings::merged(None), DEFAULT_BRANCH_SETTINGS);
    }

    #[test]
    fn present_fields_override_and_missing_ones_fall_back() {
        let row = BranchAutomationSettingsRow {
            abandonment_risk_enabled: Some(true),
            abandonment_risk_days: Some(15),
            inactive_after_renewal_days: Some(-4),
            ..Default::default()
        };
        let s = BranchAutomationSettings::merged(Some(&row));
        assert!(s.abandonment_risk_enabled);
        assert_eq!(s.abandonment_risk_days, 15);
        assert_eq!(s.inactive_after_renewal_days, 0);
        assert!(!s.auto_close_cashier_at_midnight);
    }
}
