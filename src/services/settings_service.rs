// src/services/settings_service.rs

use std::collections::HashMap;

use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    db::SettingsRepository,
    models::settings::{BranchAutomationSettings, BranchAutomationSettingsRow, DEFAULT_BRANCH_SETTINGS},
};

/// Resolve a configuração efetiva de uma unidade. Nunca falha: qualquer erro
/// de leitura cai nos padrões, e a execução segue.
#[derive(Clone)]
pub struct SettingsResolver {
    pool: PgPool,
    repo: SettingsRepository,
}

impl SettingsResolver {
    pub fn new(pool: PgPool, repo: SettingsRepository) -> Self {
        Self { pool, repo }
    }

    pub async fn resolve(&self, branch_id: Uuid) -> BranchAutomationSettings {
        match self.repo.find_branch_settings(&self.pool, branch_id).await {
            Ok(row) => BranchAutomationSettings::merged(row.as_ref()),
            Err(e) => {
                tracing::warn!(%branch_id, "Falha ao ler configurações da unidade, usando padrões: {}", e);
                DEFAULT_BRANCH_SETTINGS
            }
        }
    }

    /// Todas as unidades do tenant em uma leitura. Unidades sem linha (ou uma
    /// leitura com erro) resolvem para os padrões via `settings_for`.
    pub async fn resolve_tenant(&self, tenant_id: Uuid) -> HashMap<Uuid, BranchAutomationSettings> {
        match self.repo.list_for_tenant(&self.pool, tenant_id).await {
            Ok(rows) => merge_rows(&rows),
            Err(e) => {
                tracing::warn!(%tenant_id, "Falha ao ler configurações das unidades, usando padrões: {}", e);
                HashMap::new()
            }
        }
    }
}

pub fn merge_rows(rows: &[BranchAutomationSettingsRow]) -> HashMap<Uuid, BranchAutomationSettings> {
    rows.iter()
        .map(|row| (row.branch_id, BranchAutomationSettings::merged(Some(row))))
        .collect()
}

/// Configuração de uma unidade em um mapa já resolvido (unidade desconhecida = padrões).
pub fn settings_for(
    resolved: &HashMap<Uuid, BranchAutomationSettings>,
    branch_id: Uuid,
) -> BranchAutomationSettings {
    resolved.get(&branch_id).copied().unwrap_or(DEFAULT_BRANCH_SETTINGS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branches_without_a_row_fall_back_to_defaults() {
        let configured = Uuid::from_u128(1);
        let row = BranchAutomationSettingsRow {
            branch_id: configured,
            inactive_after_renewal_days: Some(7),
            ..Default::default()
        };
        let resolved = merge_rows(&[row]);

        assert_eq!(settings_for(&resolved, configured).inactive_after_renewal_days, 7);
        assert_eq!(settings_for(&resolved, Uuid::from_u128(2)), DEFAULT_BRANCH_SETTINGS);
    }
}
