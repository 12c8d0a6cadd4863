//! Explicit request-scoped context.
//!
//! Request identity is passed by parameter through the call chain rather than
//! through hidden global or task-local state. The posting layer attaches these
//! fields to its tracing spans.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::id::{TenantId, UserId};

/// Identity of one request as it flows through the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: Option<UserId>,
}

impl RequestContext {
    pub fn new(tenant_id: TenantId, user_id: Option<UserId>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            tenant_id,
            user_id,
        }
    }

    /// Context for background/system work with no acting user.
    pub fn system(tenant_id: TenantId) -> Self {
        Self::new(tenant_id, None)
    }
}
