// src/common/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::{common::i18n::I18nStore, middleware::i18n::Locale};

// Nosso tipo de erro interno. Os códigos (`code()`) são estáveis e servem de chave
// para as mensagens traduzidas.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    // Violação de regra de negócio (ex: "contrato não permite trancamento")
    #[error("Regra de negócio violada: {0}")]
    BusinessRule(&'static str),

    #[error("Recurso não encontrado: {0}")]
    NotFound(&'static str),

    #[error("Token inválido")]
    InvalidToken,

    #[error("Acesso negado a este estabelecimento")]
    Forbidden,

    // Cabeçalho de contexto (tenant/unidade) ausente ou malformado
    #[error("Cabeçalho obrigatório ausente ou inválido: {0}")]
    MissingHeader(&'static str),

    // Snapshot do feed de alterações que não pôde ser normalizado
    #[error("Alteração inválida: {0}")]
    InvalidChange(String),

    // Um lote falhou de forma permanente; os lotes anteriores continuam aplicados
    #[error("Gravação em lotes abortada após {committed} operações: {reason}")]
    BatchAborted { committed: usize, reason: String },

    // Outra execução do mesmo trabalho segura o lock
    #[error("Trabalho já em execução: {0}")]
    JobAlreadyRunning(&'static str),

    #[error("Trabalho excedeu o tempo máximo: {0}")]
    JobTimedOut(&'static str),

    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Erro de serialização: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),
}

impl AppError {
    /// Código estável enviado ao cliente (e chave do catálogo de mensagens).
    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "validation_error",
            AppError::BusinessRule(code) => code,
            AppError::NotFound(code) => code,
            AppError::MissingHeader(code) => code,
            AppError::InvalidToken => "invalid_token",
            AppError::Forbidden => "forbidden",
            AppError::InvalidChange(_) => "invalid_change",
            AppError::BatchAborted { .. } => "batch_aborted",
            AppError::JobAlreadyRunning(_) => "job_already_running",
            AppError::JobTimedOut(_) => "job_timed_out",
            _ => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) | AppError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            AppError::BusinessRule(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidToken => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::JobAlreadyRunning(_) => StatusCode::CONFLICT,
            AppError::JobTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Erros esperados (validação/regras) não são falhas do sistema e não vão para o log.
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    pub fn to_api_error(&self, locale: &Locale, store: &I18nStore) -> ApiError {
        if !self.is_client_error() {
            tracing::error!("Erro Interno do Servidor: {}", self);
        }

        let details = match self {
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let codes: Vec<String> = field_errors
                        .iter()
                        .map(|e| {
                            e.message
                                .as_ref()
                                .map(|m| m.to_string())
                                .unwrap_or_else(|| e.code.to_string())
                        })
                        .collect();
                    details.insert(field.to_string(), codes);
                }
                Some(json!(details))
            }
            _ => None,
        };

        ApiError {
            status: self.status(),
            code: self.code().to_string(),
            error: store.message(&locale.0, self.code()),
            details,
        }
    }
}

// O erro "pronto para o cliente", já traduzido
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub code: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

// Sem contexto de idioma (ex: rejeição de extrator), respondemos em inglês.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let locale = Locale("en".to_string());
        self.to_api_error(&locale, I18nStore::global()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_rules_are_client_errors_with_their_own_code() {
        let err = AppError::BusinessRule("contract_freeze_not_allowed");
        assert_eq!(err.code(), "contract_freeze_not_allowed");
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(err.is_client_error());
    }

    #[test]
    fn storage_failures_are_server_errors() {
        let err = AppError::BatchAborted { committed: 10, reason: "boom".into() };
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.is_client_error());
        assert_eq!(AppError::DatabaseError(sqlx::Error::RowNotFound).code(), "internal_error");
    }

    #[test]
    fn overlapping_run_is_a_conflict() {
        let err = AppError::JobAlreadyRunning("task_generation");
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "job_already_running");
        assert!(err.is_client_error());
        assert_eq!(AppError::JobTimedOut("task_generation").status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn api_error_is_translated_by_locale() {
        let store = I18nStore::global();
        let err = AppError::BusinessRule("contract_freeze_not_allowed");
        let pt = err.to_api_error(&Locale("pt".into()), store);
        let en = err.to_api_error(&Locale("en".into()), store);
        assert_ne!(pt.error, en.error);
        assert_eq!(pt.code, "contract_freeze_not_allowed");
    }
}
