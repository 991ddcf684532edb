// src/handlers/memberships.rs

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    common::{
        dates::today_utc,
        error::{ApiError, AppError},
    },
    config::AppState,
    middleware::{auth::AuthenticatedUser, i18n::Locale, tenancy::TenantContext},
    services::membership_admin::{AdjustmentResult, CancelResult, SuspensionRequest},
};

// =============================================================================
//  PAYLOADS
// =============================================================================

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SuspendPayload {
    #[schema(value_type = String, format = Date, example = "2024-03-10")]
    pub start_date: NaiveDate,

    #[validate(range(min = 1, message = "O trancamento deve ter pelo menos 1 dia"))]
    #[schema(example = 15)]
    pub days: i32,

    #[validate(length(max = 500, message = "Motivo muito longo"))]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CancelPayload {
    #[validate(length(max = 500, message = "Motivo muito longo"))]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdjustDaysPayload {
    // Positivo estende, negativo reduz
    #[schema(example = -5)]
    pub days: i32,

    #[validate(length(min = 1, max = 500, message = "Informe o motivo do ajuste"))]
    pub reason: String,
}

// =============================================================================
//  HANDLERS
// =============================================================================

// POST /api/memberships/{id}/suspend
#[utoipa::path(
    post,
    path = "/api/memberships/{id}/suspend",
    tag = "Memberships",
    request_body = SuspendPayload,
    responses(
        (status = 200, description = "Matrícula trancada", body = AdjustmentResult),
        (status = 400, description = "Dados inválidos"),
        (status = 404, description = "Matrícula não encontrada"),
        (status = 422, description = "Regra do contrato violada")
    ),
    params(
        ("id" = Uuid, Path, description = "ID da matrícula"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Academia")
    ),
    security(("api_jwt" = []))
)]
pub async fn suspend_membership(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    user: AuthenticatedUser,
    Path(membership_id): Path<Uuid>,
    Json(payload): Json<SuspendPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let request = SuspensionRequest { start_date: payload.start_date, days: payload.days };
    let result = app_state
        .membership_admin
        .suspend(tenant.0, membership_id, request, payload.reason, user.0.sub, today_utc())
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(result))
}

// POST /api/memberships/{id}/cancel
#[utoipa::path(
    post,
    path = "/api/memberships/{id}/cancel",
    tag = "Memberships",
    request_body = CancelPayload,
    responses(
        (status = 200, description = "Matrícula cancelada", body = CancelResult),
        (status = 404, description = "Matrícula não encontrada"),
        (status = 422, description = "Matrícula já cancelada")
    ),
    params(
        ("id" = Uuid, Path, description = "ID da matrícula"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Academia")
    ),
    security(("api_jwt" = []))
)]
pub async fn cancel_membership(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    user: AuthenticatedUser,
    Path(membership_id): Path<Uuid>,
    Json(payload): Json<CancelPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let result = app_state
        .membership_admin
        .cancel(tenant.0, membership_id, payload.reason, Some(user.0.sub), today_utc())
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(result))
}

// POST /api/memberships/{id}/adjust-days
#[utoipa::path(
    post,
    path = "/api/memberships/{id}/adjust-days",
    tag = "Memberships",
    request_body = AdjustDaysPayload,
    responses(
        (status = 200, description = "Término ajustado", body = AdjustmentResult),
        (status = 400, description = "Dados inválidos"),
        (status = 404, description = "Matrícula não encontrada"),
        (status = 422, description = "Ajuste não permitido")
    ),
    params(
        ("id" = Uuid, Path, description = "ID da matrícula"),
        ("x-tenant-id" = Uuid, Header, description = "ID da Academia")
    ),
    security(("api_jwt" = []))
)]
pub async fn adjust_membership_days(
    State(app_state): State<AppState>,
    locale: Locale,
    tenant: TenantContext,
    user: AuthenticatedUser,
    Path(membership_id): Path<Uuid>,
    Json(payload): Json<AdjustDaysPayload>,
) -> Result<impl IntoResponse, ApiError> {
    payload
        .validate()
        .map_err(|e| AppError::ValidationError(e).to_api_error(&locale, &app_state.i18n_store))?;

    let result = app_state
        .membership_admin
        .adjust_days(tenant.0, membership_id, payload.days, payload.reason, user.0.sub, today_utc())
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(result))
}
