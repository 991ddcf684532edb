// src/middleware/tenancy.rs

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{common::error::AppError, config::AppState, models::auth::Claims};

// Cabeçalhos HTTP customizados
const TENANT_ID_HEADER: &str = "x-tenant-id";
const BRANCH_ID_HEADER: &str = "x-branch-id";

// O tenant (academia) que o usuário quer operar, já verificado pelo `tenant_guard`
#[derive(Debug, Clone, Copy)]
pub struct TenantContext(pub Uuid);

// Unidade opcional; quando ausente a operação vale para o tenant inteiro
#[derive(Debug, Clone, Copy)]
pub struct BranchContext(pub Option<Uuid>);

/// `Ok(None)` = ausente; `Err(())` = presente mas não é um UUID.
fn header_uuid(headers: &HeaderMap, name: &str) -> Result<Option<Uuid>, ()> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => {
            let raw = value.to_str().map_err(|_| ())?;
            Uuid::parse_str(raw.trim()).map(Some).map_err(|_| ())
        }
    }
}

// Roda depois do `auth_guard`: exige o cabeçalho e confere o acesso do usuário
pub async fn tenant_guard(
    State(app_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = request.extensions().get::<Claims>().cloned().ok_or(AppError::InvalidToken)?;

    let tenant_id = header_uuid(request.headers(), TENANT_ID_HEADER)
        .ok()
        .flatten()
        .ok_or(AppError::MissingHeader("missing_tenant"))?;

    let allowed = claims.tenant_ids.contains(&tenant_id)
        || app_state
            .tenants
            .is_staff_of_tenant(&app_state.db_pool, tenant_id, claims.sub)
            .await?;

    if !allowed {
        tracing::warn!(user_id = %claims.sub, %tenant_id, "Acesso negado ao tenant");
        return Err(AppError::Forbidden);
    }

    request.extensions_mut().insert(TenantContext(tenant_id));
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .copied()
            .ok_or(AppError::MissingHeader("missing_tenant"))
    }
}

impl<S> FromRequestParts<S> for BranchContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_uuid(&parts.headers, BRANCH_ID_HEADER)
            .map(BranchContext)
            .map_err(|_| AppError::MissingHeader("missing_branch"))
    }
}
