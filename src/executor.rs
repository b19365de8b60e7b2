//! Trade executor
//!
//! Runs one winning pool entry through the full purchase pipeline inside a
//! single storage transaction: funds, order record, delivery, appreciation,
//! consignment settlement, pool-entry completion. A failure anywhere rolls
//! back this order only — sibling orders in the same batch are untouched.

use crate::appreciation::AppreciationService;
use crate::assets::{AssetService, SupplySource};
use crate::clock::Clock;
use crate::collaborators::PurchaseCollaborator;
use crate::config::TradeRules;
use crate::consignment::ConsignmentRegistry;
use crate::error::{CoreError, Result};
use crate::ledger::{FlowCtx, LedgerService};
use crate::market::MarketService;
use crate::models::{Bucket, BuyOrder, BuyOrderStatus, LedgerReason, Order, OrderStatus};
use crate::settlement::SettlementDistributor;
use crate::store::{Store, StoreTxn};

pub struct TradeExecutor<'a> {
    store: &'a dyn Store,
    rules: &'a TradeRules,
    clock: &'a dyn Clock,
    collaborator: &'a dyn PurchaseCollaborator,
}

impl<'a> TradeExecutor<'a> {
    pub fn new(
        store: &'a dyn Store,
        rules: &'a TradeRules,
        clock: &'a dyn Clock,
        collaborator: &'a dyn PurchaseCollaborator,
    ) -> Self {
        Self {
            store,
            rules,
            clock,
            collaborator,
        }
    }

    /// Execute one winning order against its assigned unit of supply.
    ///
    /// Commits on success and then fires the post-purchase collaborator
    /// hook (hook failures are logged, never propagated). Any error before
    /// commit rolls the transaction back by dropping it.
    pub async fn execute(
        &self,
        buy_order: &BuyOrder,
        source: &SupplySource,
        batch_no: &str,
    ) -> Result<Order> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;

        // Lock order: buyer account -> buy order -> item -> consignment.
        // (Seller and ancestor payout accounts are locked by the
        // settlement path afterwards.)
        txn.account_for_update(buy_order.user_id).await?;

        let mut pool_entry = txn.buy_order_for_update(buy_order.buy_order_id).await?;
        if pool_entry.status != BuyOrderStatus::Pending {
            return Err(CoreError::InvalidState {
                entity: "buy_order",
                id: pool_entry.buy_order_id,
                actual: pool_entry.status.as_str(),
                expected: BuyOrderStatus::Pending.as_str(),
            });
        }

        let mut item = txn.item_for_update(pool_entry.item_id).await?;

        // Sale price: official stock sells at the item's reference price,
        // a consignment sells at its asking price
        let price = match source {
            SupplySource::Stock => item.price,
            SupplySource::Consignment { consignment_id, .. } => {
                let listing = txn.consignment_for_update(*consignment_id).await?;
                if listing.item_id != item.item_id {
                    return Err(CoreError::Invariant(format!(
                        "consignment {} is for item {}, not {}",
                        consignment_id, listing.item_id, item.item_id
                    )));
                }
                listing.price
            }
        };

        self.take_funds(txn.as_mut(), &mut pool_entry, price, batch_no)
            .await?;

        let mut order = Order {
            order_id: 0,
            buy_order_id: pool_entry.buy_order_id,
            buyer_id: pool_entry.user_id,
            item_id: pool_entry.item_id,
            session_id: pool_entry.session_id,
            zone_id: pool_entry.zone_id,
            price,
            consignment_id: match source {
                SupplySource::Stock => None,
                SupplySource::Consignment { consignment_id, .. } => Some(*consignment_id),
            },
            status: OrderStatus::Paid,
            created_at: now,
        };
        order.order_id = txn.insert_order(&order).await?;

        let assets = AssetService::new(self.rules, self.clock);
        assets.deliver(txn.as_mut(), &order, &mut item, source).await?;

        let appreciation = AppreciationService::new(self.rules, self.clock);
        if appreciation
            .check_and_appreciate(txn.as_mut(), &mut item, order.order_id)
            .await?
            .is_some()
        {
            // The stepped-up price may cross into another bracket
            let zone = MarketService::resolve_zone(txn.as_mut(), item.price, self.rules).await?;
            item.zone_id = zone.zone_id;
        }
        txn.update_item(&item).await?;

        if let SupplySource::Consignment { consignment_id, .. } = source {
            ConsignmentRegistry::mark_sold(txn.as_mut(), *consignment_id, now).await?;
            let distributor = SettlementDistributor::new(self.rules, self.clock);
            distributor
                .distribute(txn.as_mut(), *consignment_id, &order, batch_no)
                .await?;
        }

        pool_entry.status = BuyOrderStatus::Matched;
        pool_entry.matched_order_id = Some(order.order_id);
        txn.update_buy_order(&pool_entry).await?;

        txn.commit().await?;

        tracing::info!(
            order_id = order.order_id,
            buy_order_id = pool_entry.buy_order_id,
            buyer_id = order.buyer_id,
            item_id = order.item_id,
            price = %order.price,
            from_consignment = order.consignment_id.is_some(),
            "trade executed"
        );

        if let Err(e) = self
            .collaborator
            .after_purchase(order.buyer_id, order.session_id, order.zone_id)
            .await
        {
            tracing::warn!(
                buyer_id = order.buyer_id,
                error = %e,
                "post-purchase collaborator failed"
            );
        }

        Ok(order)
    }

    /// Consume the pool-entry escrow when it covers the price; otherwise
    /// release any partial escrow and debit the full price from available.
    async fn take_funds(
        &self,
        txn: &mut dyn StoreTxn,
        pool_entry: &mut BuyOrder,
        price: rust_decimal::Decimal,
        batch_no: &str,
    ) -> Result<()> {
        let now = self.clock.now();

        if pool_entry.reserved >= price {
            let excess = pool_entry.reserved - price;
            if !excess.is_zero() {
                let ctx = FlowCtx::new(
                    LedgerReason::ReserveRelease,
                    pool_entry.buy_order_id,
                    batch_no,
                    "reservation excess over sale price",
                );
                LedgerService::credit(
                    txn,
                    pool_entry.user_id,
                    Bucket::Available,
                    excess,
                    &ctx,
                    now,
                )
                .await?;
            }
            return Ok(());
        }

        if !pool_entry.reserved.is_zero() {
            let ctx = FlowCtx::new(
                LedgerReason::ReserveRelease,
                pool_entry.buy_order_id,
                batch_no,
                "reservation short of sale price, released",
            );
            LedgerService::credit(
                txn,
                pool_entry.user_id,
                Bucket::Available,
                pool_entry.reserved,
                &ctx,
                now,
            )
            .await?;
        }

        let ctx = FlowCtx::new(
            LedgerReason::Purchase,
            pool_entry.buy_order_id,
            batch_no,
            "pool purchase",
        );
        LedgerService::debit(txn, pool_entry.user_id, Bucket::Available, price, &ctx, now).await?;
        Ok(())
    }

    /// Refund one pending pool entry: release its escrow and mark it
    /// REFUNDED, in its own transaction.
    pub async fn refund(&self, buy_order: &BuyOrder, batch_no: &str) -> Result<()> {
        let now = self.clock.now();
        let mut txn = self.store.begin().await?;

        txn.account_for_update(buy_order.user_id).await?;
        let mut pool_entry = txn.buy_order_for_update(buy_order.buy_order_id).await?;
        if pool_entry.status != BuyOrderStatus::Pending {
            return Err(CoreError::InvalidState {
                entity: "buy_order",
                id: pool_entry.buy_order_id,
                actual: pool_entry.status.as_str(),
                expected: BuyOrderStatus::Pending.as_str(),
            });
        }

        if !pool_entry.reserved.is_zero() {
            let ctx = FlowCtx::new(
                LedgerReason::PoolRefund,
                pool_entry.buy_order_id,
                batch_no,
                "pool entry refunded",
            );
            LedgerService::credit(
                txn.as_mut(),
                pool_entry.user_id,
                Bucket::Available,
                pool_entry.reserved,
                &ctx,
                now,
            )
            .await?;
        }

        pool_entry.status = BuyOrderStatus::Refunded;
        txn.update_buy_order(&pool_entry).await?;
        txn.commit().await?;

        tracing::info!(
            buy_order_id = pool_entry.buy_order_id,
            user_id = pool_entry.user_id,
            released = %pool_entry.reserved,
            "pool entry refunded"
        );
        Ok(())
    }
}
