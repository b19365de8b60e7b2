//! Market service
//!
//! Session gating for batch runs and price-zone resolution. Zones are
//! fixed-width brackets `[k*w, (k+1)*w)` created on demand the first time a
//! price lands in them.

use rust_decimal::Decimal;

use crate::config::TradeRules;
use crate::core_types::SessionId;
use crate::error::{CoreError, Result};
use crate::models::{Session, Zone};
use crate::store::{Store, StoreTxn};

pub struct MarketService;

impl MarketService {
    /// Resolve a session and require it to be open
    pub async fn open_session(store: &dyn Store, session_id: SessionId) -> Result<Session> {
        let session = store
            .session(session_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "session",
                id: session_id,
            })?;
        if !session.is_open() {
            return Err(CoreError::SessionNotOpen(session_id));
        }
        Ok(session)
    }

    /// Bracket bounds for a price at the configured zone width
    pub fn zone_bounds(price: Decimal, width: Decimal) -> (Decimal, Decimal) {
        let floor = (price / width).floor() * width;
        (floor, floor + width)
    }

    /// Find the zone containing `price`, creating the bracket on demand
    pub async fn resolve_zone(
        txn: &mut dyn StoreTxn,
        price: Decimal,
        rules: &TradeRules,
    ) -> Result<Zone> {
        if let Some(zone) = txn.find_zone(price).await? {
            return Ok(zone);
        }
        let (floor, ceiling) = Self::zone_bounds(price, rules.zone_width);
        let zone = txn.insert_zone(floor, ceiling).await?;
        tracing::info!(zone_id = zone.zone_id, floor = %floor, ceiling = %ceiling, "zone created");
        Ok(zone)
    }
}
