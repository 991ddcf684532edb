// src/models/change.rs

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

// Uma linha do outbox `entity_changes`, escrita pelos gatilhos do banco.
// `before`/`after` são o `to_jsonb` da linha; ausentes em inserção/remoção.
#[derive(Debug, Clone, FromRow)]
pub struct EntityChange {
    pub id: i64,
    pub event_id: Uuid,
    pub entity: String,
    pub entity_id: Uuid,
    pub before: Option<Value>,
    pub after: Option<Value>,
    pub created_at: DateTime<Utc>,
    // Falhas já registradas para este evento
    pub attempts: i32,
}
