// src/models/auth.rs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Estrutura de dados ("claims") dentro do JWT emitido pelo serviço de autenticação
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,  // Subject (ID do usuário da equipe)
    // Tenants que o usuário pode operar. Vazio = nenhum.
    #[serde(default)]
    pub tenant_ids: Vec<Uuid>,
    pub exp: usize, // Expiration time
    pub iat: usize, // Issued At
}
