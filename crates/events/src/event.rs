use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use ledgerkit_core::TenantId;

/// An immutable record of something that happened.
///
/// Events are facts: emitted once, after a successful commit, and never
/// consumed by the ledger itself (no feedback loop into posting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Stable event name (e.g. "ledger.entry.posted").
    pub name: String,
    pub tenant_id: TenantId,
    /// The primary entity this event is about.
    pub entity_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub metadata: JsonValue,
}

impl DomainEvent {
    pub fn new(
        name: impl Into<String>,
        tenant_id: TenantId,
        entity_id: Uuid,
        metadata: JsonValue,
    ) -> Self {
        Self {
            name: name.into(),
            tenant_id,
            entity_id,
            occurred_at: Utc::now(),
            metadata,
        }
    }
}
