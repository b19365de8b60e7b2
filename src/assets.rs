//! Asset service
//!
//! Orchestrates the ownership side of the market: pool entry with funds
//! escrow, delivery of a sold unit to its buyer, and the consignment
//! lifecycle around the registry (validation, service fee, zone placement).

use chrono::Duration;
use rust_decimal::Decimal;

use crate::clock::Clock;
use crate::config::TradeRules;
use crate::core_types::{BuyOrderId, ConsignmentId, HoldingId, ItemId, UserId};
use crate::error::{CoreError, Result};
use crate::consignment::ConsignmentRegistry;
use crate::ledger::{FlowCtx, LedgerService};
use crate::market::MarketService;
use crate::models::{
    Bucket, BuyOrder, BuyOrderStatus, ConsignmentListing, ConsignmentStatus, DeliveryStatus,
    Holding, HoldingConsignStatus, Item, ItemStatus, LedgerReason, Order,
};
use crate::money::round2;
use crate::store::StoreTxn;

/// Where a trade's unit of supply comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupplySource {
    /// Official inventory
    Stock,
    /// A seller's active consignment
    Consignment {
        consignment_id: ConsignmentId,
        seller_id: UserId,
    },
}

pub struct AssetService<'a> {
    rules: &'a TradeRules,
    clock: &'a dyn Clock,
}

impl<'a> AssetService<'a> {
    pub fn new(rules: &'a TradeRules, clock: &'a dyn Clock) -> Self {
        Self { rules, clock }
    }

    /// Enter the buying pool for an item, optionally escrowing the item's
    /// current price so the batch can settle without touching available
    /// balance again.
    pub async fn enter_pool(
        &self,
        txn: &mut dyn StoreTxn,
        user_id: UserId,
        item_id: ItemId,
        weight: u32,
        reserve: bool,
    ) -> Result<BuyOrder> {
        let now = self.clock.now();
        // Account first, item second (global lock order)
        txn.account_for_update(user_id).await?;
        let item = txn.item_for_update(item_id).await?;
        if item.status != ItemStatus::Active {
            return Err(CoreError::InvalidState {
                entity: "item",
                id: item_id,
                actual: item.status.as_str(),
                expected: ItemStatus::Active.as_str(),
            });
        }

        let mut order = BuyOrder {
            buy_order_id: 0,
            session_id: item.session_id,
            item_id,
            zone_id: item.zone_id,
            user_id,
            weight: weight.max(1),
            reserved: Decimal::ZERO,
            status: BuyOrderStatus::Pending,
            matched_order_id: None,
            created_at: now,
        };
        order.buy_order_id = txn.insert_buy_order(&order).await?;

        if reserve {
            let ctx = FlowCtx::new(
                LedgerReason::PoolReserve,
                order.buy_order_id,
                &ulid::Ulid::new().to_string(),
                format!("pool entry for item {}", item_id),
            );
            LedgerService::debit(txn, user_id, Bucket::Available, item.price, &ctx, now).await?;
            order.reserved = round2(item.price);
            txn.update_buy_order(&order).await?;
        }

        tracing::info!(
            buy_order_id = order.buy_order_id,
            user_id,
            item_id,
            weight = order.weight,
            reserved = %order.reserved,
            "pool entry created"
        );
        Ok(order)
    }

    /// Cancel a pending pool entry, releasing its escrow. Only valid before
    /// a batch run picks the order up.
    pub async fn cancel_buy_order(
        &self,
        txn: &mut dyn StoreTxn,
        user_id: UserId,
        buy_order_id: BuyOrderId,
        batch_no: &str,
    ) -> Result<BuyOrder> {
        txn.account_for_update(user_id).await?;
        let mut order = txn.buy_order_for_update(buy_order_id).await?;
        if order.user_id != user_id {
            return Err(CoreError::NotOwner(buy_order_id, user_id));
        }
        if order.status != BuyOrderStatus::Pending {
            return Err(CoreError::InvalidState {
                entity: "buy_order",
                id: buy_order_id,
                actual: order.status.as_str(),
                expected: BuyOrderStatus::Pending.as_str(),
            });
        }

        if !order.reserved.is_zero() {
            let ctx = FlowCtx::new(
                LedgerReason::PoolRefund,
                buy_order_id,
                batch_no,
                "pool entry cancelled",
            );
            LedgerService::credit(txn, user_id, Bucket::Available, order.reserved, &ctx, self.clock.now())
                .await?;
        }
        order.status = BuyOrderStatus::Refunded;
        txn.update_buy_order(&order).await?;
        Ok(order)
    }

    /// Deliver a sold unit: create the buyer's holding and update the item's
    /// counters. Official-stock fills decrement stock and auto-disable the
    /// item at zero; consignment fills leave stock untouched.
    ///
    /// The item row is locked by the caller and persisted by the caller
    /// (appreciation may still adjust it).
    pub async fn deliver(
        &self,
        txn: &mut dyn StoreTxn,
        order: &Order,
        item: &mut Item,
        source: &SupplySource,
    ) -> Result<Holding> {
        if let SupplySource::Stock = source {
            if item.stock <= 0 {
                return Err(CoreError::OutOfStock(item.item_id));
            }
            item.stock -= 1;
            if item.stock < 0 {
                return Err(CoreError::Invariant(format!(
                    "item {} stock went negative",
                    item.item_id
                )));
            }
            if item.stock == 0 && item.status == ItemStatus::Active {
                item.status = ItemStatus::Inactive;
                tracing::info!(item_id = item.item_id, "item sold out, auto-disabled");
            }
        }
        item.sales += 1;

        let mut holding = Holding {
            holding_id: 0,
            owner_id: order.buyer_id,
            source_order_id: order.order_id,
            item_id: item.item_id,
            price: order.price,
            consign_status: HoldingConsignStatus::None,
            delivery: DeliveryStatus::Delivered,
            free_relists: 0,
            legacy: false,
            acquired_at: order.created_at,
        };
        holding.holding_id = txn.insert_holding(&holding).await?;

        tracing::info!(
            holding_id = holding.holding_id,
            owner_id = order.buyer_id,
            item_id = item.item_id,
            order_id = order.order_id,
            "holding delivered"
        );
        Ok(holding)
    }

    /// List a holding for resale.
    ///
    /// Validates ownership, delivery, the unlock window and the current
    /// consignment state; charges the service fee (waived for legacy assets
    /// and fee-free relist credits); places the listing in the zone bracket
    /// of its asking price; then drives the registry transition.
    pub async fn create_consignment(
        &self,
        txn: &mut dyn StoreTxn,
        seller_id: UserId,
        holding_id: HoldingId,
        ask_price: Decimal,
    ) -> Result<ConsignmentListing> {
        let now = self.clock.now();
        if ask_price <= Decimal::ZERO {
            return Err(CoreError::InvalidConfig(format!(
                "asking price must be positive, got {}",
                ask_price
            )));
        }
        let ask_price = round2(ask_price);

        // Account first (fee debit may follow); the holding is the entry
        // point here and names the item, so it is locked before the item
        // (the documented exception to the global order)
        txn.account_for_update(seller_id).await?;
        let mut holding = txn.holding_for_update(holding_id).await?;
        if holding.owner_id != seller_id {
            return Err(CoreError::NotOwner(holding_id, seller_id));
        }
        if holding.delivery != DeliveryStatus::Delivered {
            return Err(CoreError::InvalidState {
                entity: "holding",
                id: holding_id,
                actual: holding.delivery.as_str(),
                expected: DeliveryStatus::Delivered.as_str(),
            });
        }
        let unlocked_at = holding.acquired_at + Duration::hours(self.rules.consign_unlock_hours);
        if now < unlocked_at {
            return Err(CoreError::ConsignmentLocked(holding_id, unlocked_at));
        }

        let item = txn.item_for_update(holding.item_id).await?;

        // Fee: legacy assets never pay (and never get rebates); a free
        // relist credit covers the fee once
        let fee = if holding.legacy {
            Decimal::ZERO
        } else if holding.free_relists > 0 {
            holding.free_relists -= 1;
            txn.update_holding(&holding).await?;
            Decimal::ZERO
        } else {
            round2(ask_price * self.rules.service_fee_rate)
        };

        let zone = MarketService::resolve_zone(txn, ask_price, self.rules).await?;

        let listing = ConsignmentRegistry::create(
            txn,
            ConsignmentListing {
                consignment_id: 0,
                seller_id,
                holding_id,
                item_id: holding.item_id,
                package_id: item.package_id,
                zone_id: zone.zone_id,
                price: ask_price,
                original_price: holding.price,
                service_fee: fee,
                status: ConsignmentStatus::Selling,
                sold_at: None,
                settled_at: None,
                settlement_snapshot: None,
                created_at: now,
            },
        )
        .await?;

        if !fee.is_zero() {
            let ctx = FlowCtx::new(
                LedgerReason::ServiceFee,
                listing.consignment_id,
                &ulid::Ulid::new().to_string(),
                format!("listing fee for consignment {}", listing.consignment_id),
            );
            LedgerService::debit(txn, seller_id, Bucket::Available, fee, &ctx, now).await?;
        }

        Ok(listing)
    }

    /// Take a consignment down at the seller's request. The fee is not
    /// refunded (off-shelf compensation covers platform-initiated removals).
    pub async fn cancel_consignment(
        &self,
        txn: &mut dyn StoreTxn,
        seller_id: UserId,
        consignment_id: ConsignmentId,
    ) -> Result<ConsignmentListing> {
        let listing = txn.consignment_for_update(consignment_id).await?;
        if listing.seller_id != seller_id {
            return Err(CoreError::NotOwner(consignment_id, seller_id));
        }
        ConsignmentRegistry::cancel(txn, consignment_id).await
    }
}
