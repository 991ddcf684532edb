// src/handlers/automation.rs

use axum::{extract::State, response::IntoResponse, Json};
use uuid::Uuid;

use crate::{
    common::{
        dates::today_utc,
        error::{ApiError, AppError},
    },
    config::AppState,
    middleware::{auth::AuthenticatedUser, i18n::Locale},
    models::{
        auth::Claims,
        automation::{ReconcileReport, RunRequest, RunSummary, TenantTaskReport},
    },
};

/// Limita a execução manual aos tenants do token. Sem filtro = todos os do usuário.
fn scope_to_claims(mut request: RunRequest, claims: &Claims) -> Result<RunRequest, AppError> {
    let requested: Vec<Uuid> = match request.tenant_ids.take() {
        Some(ids) => {
            if ids.iter().any(|id| !claims.tenant_ids.contains(id)) {
                return Err(AppError::Forbidden);
            }
            ids
        }
        None => claims.tenant_ids.clone(),
    };
    request.tenant_ids = Some(requested);
    Ok(request)
}

// POST /api/automation/tasks/run
#[utoipa::path(
    post,
    path = "/api/automation/tasks/run",
    tag = "Automation",
    request_body = RunRequest,
    responses(
        (status = 200, description = "Resumo da geração de tarefas por tenant/unidade", body = RunSummary<TenantTaskReport>),
        (status = 403, description = "Tenant fora do escopo do usuário"),
        (status = 409, description = "Geração de tarefas já em execução"),
        (status = 504, description = "Tempo máximo de execução excedido")
    ),
    security(("api_jwt" = []))
)]
pub async fn run_tasks(
    State(app_state): State<AppState>,
    locale: Locale,
    user: AuthenticatedUser,
    Json(payload): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = scope_to_claims(payload, &user.0)
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    let date = request.date.unwrap_or_else(today_utc);

    tracing::info!(user_id = %user.0.sub, %date, dry_run = request.dry_run, "Geração de tarefas manual");

    let summary = app_state
        .scheduler
        .run_tasks_now(date, &request)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(summary))
}

// POST /api/automation/memberships/run
#[utoipa::path(
    post,
    path = "/api/automation/memberships/run",
    tag = "Automation",
    request_body = RunRequest,
    responses(
        (status = 200, description = "Resumo da reconciliação de matrículas por tenant", body = RunSummary<ReconcileReport>),
        (status = 403, description = "Tenant fora do escopo do usuário"),
        (status = 409, description = "Reconciliação já em execução"),
        (status = 422, description = "Filtro por unidade não é aceito nesta rotina"),
        (status = 504, description = "Tempo máximo de execução excedido")
    ),
    security(("api_jwt" = []))
)]
pub async fn run_membership_sync(
    State(app_state): State<AppState>,
    locale: Locale,
    user: AuthenticatedUser,
    Json(payload): Json<RunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = scope_to_claims(payload, &user.0)
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;
    let date = request.date.unwrap_or_else(today_utc);

    tracing::info!(user_id = %user.0.sub, %date, dry_run = request.dry_run, "Reconciliação manual");

    let summary = app_state
        .scheduler
        .run_membership_sync_now(date, &request)
        .await
        .map_err(|e| e.to_api_error(&locale, &app_state.i18n_store))?;

    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(tenants: Vec<Uuid>) -> Claims {
        Claims { sub: Uuid::new_v4(), tenant_ids: tenants, exp: 0, iat: 0 }
    }

    #[test]
    fn missing_filter_defaults_to_token_tenants() {
        let t = Uuid::new_v4();
        let scoped = scope_to_claims(RunRequest::default(), &claims(vec![t])).unwrap();
        assert_eq!(scoped.tenant_ids, Some(vec![t]));
    }

    #[test]
    fn foreign_tenant_is_forbidden() {
        let request = RunRequest { tenant_ids: Some(vec![Uuid::new_v4()]), ..Default::default() };
        let err = scope_to_claims(request, &claims(vec![Uuid::new_v4()])).unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
    }
}
