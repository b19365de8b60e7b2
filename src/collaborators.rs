//! Outbound collaborator hooks
//!
//! The core only triggers these after a purchase commits; their internals
//! (loyalty tiers, coupon issuance) live in other services.

use async_trait::async_trait;

use crate::core_types::{SessionId, UserId, ZoneId};
use crate::error::Result;

/// Post-purchase side effects: buyer-tier upgrade check and coupon issuance
#[async_trait]
pub trait PurchaseCollaborator: Send + Sync {
    async fn after_purchase(
        &self,
        user_id: UserId,
        session_id: SessionId,
        zone_id: ZoneId,
    ) -> Result<()>;
}

/// Default wiring when no collaborator is attached
pub struct NoopCollaborator;

#[async_trait]
impl PurchaseCollaborator for NoopCollaborator {
    async fn after_purchase(
        &self,
        user_id: UserId,
        session_id: SessionId,
        zone_id: ZoneId,
    ) -> Result<()> {
        tracing::debug!(user_id, session_id, zone_id, "post-purchase hook (noop)");
        Ok(())
    }
}
