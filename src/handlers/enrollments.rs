// src/handlers/enrollments.rs

use axum::{extract::State, response::IntoResponse, Json};
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::error::{ApiError, AppError},
    config::AppState,
    middleware::{
        i18n::Locale,
        tenancy::{BranchContext, TenantContext},
    },
    services::enrollment_service::{RecountReport, RecountRequest},
};

// POST /api/enrollments/recount
#[utoipa::path(
    post,
    path = "/api/enrollments/recount",
    tag = "Enrollments",
    request_body = RecountRequest,
    responses(
        (status = 200, description = "Sessões recontadas", body = RecountReport),
        (status = 400, description = "Dados inválidos"),
        (status = 422, description = "Intervalo de datas inválido")
    ),
    params(
        ("x-tenant-id" = Uuid, Header, description = "ID da Academia"),
        ("x-branch-id" = Option<Uuid>, Header, description = "ID da Unidade (opcional)")
    ),
    security(("api_jwt" = []))
)]
pub async fn recount_enrollments(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    branch: BranchContext,
    Json(payload): Json<RecountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let report = app_state
        .enrollments
        .recount(tenant.0, branch.0, &payload)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    tracing::info!(
        tenant_id = %tenant.0,
        scanned = report.sessions_scanned,
        updated = report.sessions_updated,
        "Recontagem de sessões concluída"
    );

    Ok(Json(report))
}
