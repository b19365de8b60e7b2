//! Consignment registry
//!
//! State machine for a seller's resale listing and the linked holding:
//! `SELLING -> {SOLD, CANCELLED, OFF_SHELF}`, all terminal. Every transition
//! updates the listing and the holding in the same transaction so the
//! holding's consignment status always mirrors its active listing.

use chrono::{DateTime, Utc};

use crate::core_types::ConsignmentId;
use crate::error::{CoreError, Result};
use crate::models::{ConsignmentListing, ConsignmentStatus, Holding, HoldingConsignStatus};
use crate::store::StoreTxn;

pub struct ConsignmentRegistry;

impl ConsignmentRegistry {
    /// Put a holding up for sale: the listing is inserted as SELLING and the
    /// holding is flipped to SELLING atomically.
    ///
    /// The caller (asset service) has already validated ownership, the
    /// unlock window and the fee; `listing` arrives fully priced.
    pub async fn create(
        txn: &mut dyn StoreTxn,
        mut listing: ConsignmentListing,
    ) -> Result<ConsignmentListing> {
        let mut holding = txn.holding_for_update(listing.holding_id).await?;
        if holding.consign_status != HoldingConsignStatus::None {
            return Err(CoreError::InvalidState {
                entity: "holding",
                id: holding.holding_id,
                actual: holding.consign_status.as_str(),
                expected: HoldingConsignStatus::None.as_str(),
            });
        }

        listing.status = ConsignmentStatus::Selling;
        listing.consignment_id = txn.insert_consignment(&listing).await?;

        holding.consign_status = HoldingConsignStatus::Selling;
        txn.update_holding(&holding).await?;

        tracing::info!(
            consignment_id = listing.consignment_id,
            holding_id = holding.holding_id,
            seller_id = listing.seller_id,
            price = %listing.price,
            "consignment listed"
        );
        Ok(listing)
    }

    /// SELLING -> SOLD, recording the sold time
    pub async fn mark_sold(
        txn: &mut dyn StoreTxn,
        consignment_id: ConsignmentId,
        now: DateTime<Utc>,
    ) -> Result<ConsignmentListing> {
        let mut listing = Self::selling_for_update(txn, consignment_id).await?;
        listing.status = ConsignmentStatus::Sold;
        listing.sold_at = Some(now);
        txn.update_consignment(&listing).await?;
        Self::sync_holding(txn, &listing).await?;

        tracing::info!(consignment_id, holding_id = listing.holding_id, "consignment sold");
        Ok(listing)
    }

    /// SELLING -> CANCELLED (seller decision); the holding returns to NONE
    pub async fn cancel(
        txn: &mut dyn StoreTxn,
        consignment_id: ConsignmentId,
    ) -> Result<ConsignmentListing> {
        let mut listing = Self::selling_for_update(txn, consignment_id).await?;
        listing.status = ConsignmentStatus::Cancelled;
        txn.update_consignment(&listing).await?;
        Self::sync_holding(txn, &listing).await?;

        tracing::info!(consignment_id, holding_id = listing.holding_id, "consignment cancelled");
        Ok(listing)
    }

    /// SELLING -> OFF_SHELF (platform decision, e.g. the session closed
    /// without a match); optionally grants one fee-waived relist credit as
    /// compensation
    pub async fn off_shelf(
        txn: &mut dyn StoreTxn,
        consignment_id: ConsignmentId,
        grant_relist: bool,
        reason: &str,
    ) -> Result<ConsignmentListing> {
        let mut listing = Self::selling_for_update(txn, consignment_id).await?;
        listing.status = ConsignmentStatus::OffShelf;
        txn.update_consignment(&listing).await?;

        let mut holding = txn.holding_for_update(listing.holding_id).await?;
        holding.consign_status = listing.status.holding_status();
        if grant_relist {
            holding.free_relists += 1;
        }
        txn.update_holding(&holding).await?;

        tracing::info!(
            consignment_id,
            holding_id = listing.holding_id,
            grant_relist,
            reason,
            "consignment off-shelved"
        );
        Ok(listing)
    }

    /// Lock a listing and require it to still be SELLING
    async fn selling_for_update(
        txn: &mut dyn StoreTxn,
        consignment_id: ConsignmentId,
    ) -> Result<ConsignmentListing> {
        let listing = txn.consignment_for_update(consignment_id).await?;
        if listing.status != ConsignmentStatus::Selling {
            return Err(CoreError::InvalidState {
                entity: "consignment",
                id: consignment_id,
                actual: listing.status.as_str(),
                expected: ConsignmentStatus::Selling.as_str(),
            });
        }
        Ok(listing)
    }

    /// Mirror the listing status onto the linked holding
    async fn sync_holding(txn: &mut dyn StoreTxn, listing: &ConsignmentListing) -> Result<()> {
        let mut holding = txn.holding_for_update(listing.holding_id).await?;
        holding.consign_status = listing.status.holding_status();
        txn.update_holding(&holding).await?;
        Ok(())
    }

    /// Invariant check: the holding's consignment status equals the mapping
    /// of its listing's status
    pub fn check_sync(listing: &ConsignmentListing, holding: &Holding) -> Result<()> {
        if holding.consign_status != listing.status.holding_status() {
            return Err(CoreError::Invariant(format!(
                "holding {} is {} but listing {} is {}",
                holding.holding_id,
                holding.consign_status.as_str(),
                listing.consignment_id,
                listing.status
            )));
        }
        Ok(())
    }
}
