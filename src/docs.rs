// src/docs.rs

use utoipa::OpenApi;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use crate::handlers;
use crate::models;
use crate::services;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Automation ---
        handlers::automation::run_tasks,
        handlers::automation::run_membership_sync,

        // --- Memberships ---
        handlers::memberships::suspend_membership,
        handlers::memberships::cancel_membership,
        handlers::memberships::adjust_membership_days,

        // --- Enrollments ---
        handlers::enrollments::recount_enrollments,
    ),
    components(
        schemas(
            // --- Automation ---
            models::automation::RunRequest,
            models::automation::TenantTaskReport,
            models::automation::BranchTaskReport,
            models::automation::ReconcileReport,
            models::task::TaskKind,
            models::task::NewTask,

            // --- Memberships ---
            models::membership::MembershipStatus,
            handlers::memberships::SuspendPayload,
            handlers::memberships::CancelPayload,
            handlers::memberships::AdjustDaysPayload,
            services::membership_admin::AdjustmentResult,
            services::membership_admin::CancelResult,

            // --- Enrollments ---
            services::enrollment_service::RecountRequest,
            services::enrollment_service::RecountReport,
            services::enrollment_service::SessionRecount,
        )
    ),
    tags(
        (name = "Automation", description = "Execução manual (e prévia) das rotinas diárias"),
        (name = "Memberships", description = "Trancamento, cancelamento e ajuste de contratos"),
        (name = "Enrollments", description = "Contagens de alunos por turma e sessão")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_jwt",
            SecurityScheme::Http(
                Http::new(HttpAuthScheme::Bearer)
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/automation/tasks/run",
            "/api/automation/memberships/run",
            "/api/memberships/{id}/suspend",
            "/api/memberships/{id}/cancel",
            "/api/memberships/{id}/adjust-days",
            "/api/enrollments/recount",
        ] {
            assert!(doc.paths.paths.contains_key(path), "rota ausente: {}", path);
        }
    }
}
