//! Settlement distributor
//!
//! Splits resale proceeds into principal, fee rebate, profit share and
//! referral commissions. Every leg is posted through the ledger under one
//! batch id, and the full breakdown is frozen onto the consignment row so
//! later configuration changes never alter a historical payout.
//!
//! The single-settlement guarantee lives here: `settled_at` is checked and
//! set under the consignment row lock, so a second invocation for the same
//! consignment fails instead of double-crediting the seller.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{MAX_COMMISSION_LEVELS, TradeRules};
use crate::error::{CoreError, Result};
use crate::ledger::{FlowCtx, LedgerService};
use crate::models::{Bucket, ConsignmentListing, ConsignmentStatus, LedgerReason, Order};
use crate::money::round2;
use crate::store::StoreTxn;

/// One referral commission payment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommissionLeg {
    pub level: usize,
    pub beneficiary: u64,
    pub rate: Decimal,
    pub amount: Decimal,
}

/// Frozen record of how one sale's proceeds were distributed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementBreakdown {
    pub consignment_id: u64,
    pub order_id: u64,
    pub seller_id: u64,
    pub price: Decimal,
    pub principal: Decimal,
    pub service_fee: Decimal,
    pub profit: Decimal,
    pub to_withdrawable: Decimal,
    pub to_score: Decimal,
    pub legacy: bool,
    /// Rule value used: profit split, or the legacy principal split
    pub split_rate: Decimal,
    pub commissions: Vec<CommissionLeg>,
}

pub struct SettlementDistributor<'a> {
    rules: &'a TradeRules,
    clock: &'a dyn Clock,
}

impl<'a> SettlementDistributor<'a> {
    pub fn new(rules: &'a TradeRules, clock: &'a dyn Clock) -> Self {
        Self { rules, clock }
    }

    /// Pay the seller of a sold consignment and cascade referral
    /// commissions. Must run inside the same transaction that marked the
    /// listing sold.
    ///
    /// # Errors
    /// - `InvalidState` when the listing is not SOLD
    /// - `AlreadySettled` when a payout was already distributed
    pub async fn distribute(
        &self,
        txn: &mut dyn StoreTxn,
        consignment_id: u64,
        order: &Order,
        batch_no: &str,
    ) -> Result<SettlementBreakdown> {
        let now = self.clock.now();

        // Re-read under the row lock; the settled_at guard must see the
        // latest committed state
        let mut listing = txn.consignment_for_update(consignment_id).await?;
        if listing.status != ConsignmentStatus::Sold {
            return Err(CoreError::InvalidState {
                entity: "consignment",
                id: consignment_id,
                actual: listing.status.as_str(),
                expected: ConsignmentStatus::Sold.as_str(),
            });
        }
        if listing.settled_at.is_some() {
            return Err(CoreError::AlreadySettled(consignment_id));
        }

        let holding = txn.holding_for_update(listing.holding_id).await?;
        let legacy = holding.legacy;

        let breakdown = self.compute(&listing, order, legacy)?;
        self.pay_seller(txn, &listing, &breakdown, batch_no, now).await?;

        let commissions = if breakdown.profit.is_zero() || self.rules.commissions_disabled() {
            Vec::new()
        } else {
            self.cascade(txn, &listing, order, breakdown.profit, batch_no, now)
                .await?
        };

        let breakdown = SettlementBreakdown {
            commissions,
            ..breakdown
        };

        listing.settled_at = Some(now);
        listing.settlement_snapshot = Some(
            serde_json::to_string(&breakdown)
                .map_err(|e| CoreError::Invariant(format!("snapshot serialization: {}", e)))?,
        );
        txn.update_consignment(&listing).await?;

        tracing::info!(
            consignment_id,
            order_id = order.order_id,
            seller_id = listing.seller_id,
            price = %breakdown.price,
            profit = %breakdown.profit,
            to_withdrawable = %breakdown.to_withdrawable,
            to_score = %breakdown.to_score,
            legacy,
            "settlement distributed"
        );

        Ok(breakdown)
    }

    /// Distribution arithmetic. The withdrawable and score legs always sum
    /// to `principal + fee + profit` exactly: the rounded share is taken
    /// first and the complement is the remainder, never a second rounding
    /// of the same product.
    fn compute(
        &self,
        listing: &ConsignmentListing,
        order: &Order,
        legacy: bool,
    ) -> Result<SettlementBreakdown> {
        let price = order.price;
        let principal = listing.original_price;
        let fee = listing.service_fee;

        if legacy {
            // Legacy assets: no fee ever collected, profit forced to zero,
            // principal split across withdrawable/score by the configured ratio
            if !fee.is_zero() {
                return Err(CoreError::Invariant(format!(
                    "legacy consignment {} carries a service fee {}",
                    listing.consignment_id, fee
                )));
            }
            let split = self.rules.legacy_principal_split;
            let to_withdrawable = round2(principal * split);
            let to_score = round2(principal - to_withdrawable);
            return Ok(SettlementBreakdown {
                consignment_id: listing.consignment_id,
                order_id: order.order_id,
                seller_id: listing.seller_id,
                price,
                principal,
                service_fee: fee,
                profit: Decimal::ZERO,
                to_withdrawable,
                to_score,
                legacy: true,
                split_rate: split,
                commissions: Vec::new(),
            });
        }

        let profit = (price - principal - fee).max(Decimal::ZERO);
        let split = self.rules.profit_split;
        let share = round2(profit * split);
        let to_withdrawable = round2(principal + fee + share);
        let to_score = round2(profit - share);

        Ok(SettlementBreakdown {
            consignment_id: listing.consignment_id,
            order_id: order.order_id,
            seller_id: listing.seller_id,
            price,
            principal,
            service_fee: fee,
            profit,
            to_withdrawable,
            to_score,
            legacy: false,
            split_rate: split,
            commissions: Vec::new(),
        })
    }

    /// Post the seller's legs under one flow id
    async fn pay_seller(
        &self,
        txn: &mut dyn StoreTxn,
        listing: &ConsignmentListing,
        breakdown: &SettlementBreakdown,
        batch_no: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let seller = listing.seller_id;
        let ctx = FlowCtx::new(
            LedgerReason::SellerPrincipal,
            listing.consignment_id,
            batch_no,
            format!("consignment {} sold via order {}", listing.consignment_id, breakdown.order_id),
        );

        if breakdown.legacy {
            if !breakdown.to_withdrawable.is_zero() {
                LedgerService::credit(
                    txn,
                    seller,
                    Bucket::Withdrawable,
                    breakdown.to_withdrawable,
                    &ctx,
                    now,
                )
                .await?;
            }
            if !breakdown.to_score.is_zero() {
                let leg = ctx.leg(LedgerReason::SellerPrincipal, "legacy principal score share");
                LedgerService::credit(txn, seller, Bucket::Score, breakdown.to_score, &leg, now)
                    .await?;
            }
            return Ok(());
        }

        if !breakdown.principal.is_zero() {
            LedgerService::credit(txn, seller, Bucket::Withdrawable, breakdown.principal, &ctx, now)
                .await?;
        }
        if !breakdown.service_fee.is_zero() {
            let leg = ctx.leg(LedgerReason::FeeRebate, "service fee rebate");
            LedgerService::credit(txn, seller, Bucket::Withdrawable, breakdown.service_fee, &leg, now)
                .await?;
        }

        let share = round2(breakdown.profit * breakdown.split_rate);
        if !share.is_zero() {
            let leg = ctx.leg(LedgerReason::ProfitShare, "profit withdrawable share");
            LedgerService::credit(txn, seller, Bucket::Withdrawable, share, &leg, now).await?;
        }
        if !breakdown.to_score.is_zero() {
            let leg = ctx.leg(LedgerReason::ProfitShare, "profit score share");
            LedgerService::credit(txn, seller, Bucket::Score, breakdown.to_score, &leg, now)
                .await?;
        }
        Ok(())
    }

    /// Walk up to [`MAX_COMMISSION_LEVELS`] of the seller's inviter chain,
    /// paying each ancestor `round2(profit * rate)` into withdrawable.
    /// A missing inviter ends the walk; a zero rate skips the level.
    async fn cascade(
        &self,
        txn: &mut dyn StoreTxn,
        listing: &ConsignmentListing,
        order: &Order,
        profit: Decimal,
        batch_no: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CommissionLeg>> {
        let mut legs = Vec::new();
        let mut current = listing.seller_id;

        for level in 1..=MAX_COMMISSION_LEVELS {
            let Some(ancestor) = txn.inviter_of(current).await? else {
                break;
            };

            let rate = self.rules.commission_rate(level);
            let amount = round2(profit * rate);
            if !amount.is_zero() {
                let ctx = FlowCtx::new(
                    LedgerReason::Commission,
                    order.order_id,
                    batch_no,
                    format!(
                        "level {} commission for seller {} order {}",
                        level, listing.seller_id, order.order_id
                    ),
                );
                LedgerService::credit(txn, ancestor, Bucket::Withdrawable, amount, &ctx, now)
                    .await?;
                legs.push(CommissionLeg {
                    level,
                    beneficiary: ancestor,
                    rate,
                    amount,
                });
            }

            current = ancestor;
        }

        Ok(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::{DeliveryStatus, Holding, HoldingConsignStatus, OrderStatus};
    use crate::store::{MemStore, Store};
    use chrono::TimeZone;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn clock() -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 10, 9, 0, 0).unwrap())
    }

    struct Fixture {
        store: MemStore,
        consignment_id: u64,
        order: Order,
    }

    /// Seller 10 consigns a holding (cost basis `original`, fee `fee`),
    /// sold to buyer 20 at `price`
    async fn fixture(price: &str, original: &str, fee: &str, legacy: bool) -> Fixture {
        let store = MemStore::new();
        let now = Utc.with_ymd_and_hms(2025, 6, 9, 9, 0, 0).unwrap();

        let holding_id = store
            .seed_holding(Holding {
                holding_id: 0,
                owner_id: 10,
                source_order_id: 1,
                item_id: 1,
                price: dec(original),
                consign_status: HoldingConsignStatus::Sold,
                delivery: DeliveryStatus::Delivered,
                free_relists: 0,
                legacy,
                acquired_at: now,
            })
            .await;
        let consignment_id = store
            .seed_consignment(ConsignmentListing {
                consignment_id: 0,
                seller_id: 10,
                holding_id,
                item_id: 1,
                package_id: 0,
                zone_id: 1,
                price: dec(price),
                original_price: dec(original),
                service_fee: dec(fee),
                status: ConsignmentStatus::Sold,
                sold_at: Some(now),
                settled_at: None,
                settlement_snapshot: None,
                created_at: now,
            })
            .await;

        let order = Order {
            order_id: 77,
            buy_order_id: 5,
            buyer_id: 20,
            item_id: 1,
            session_id: 1,
            zone_id: 1,
            price: dec(price),
            consignment_id: Some(consignment_id),
            status: OrderStatus::Paid,
            created_at: now,
        };

        Fixture {
            store,
            consignment_id,
            order,
        }
    }

    #[tokio::test]
    async fn test_standard_split_scenario() {
        // P=150, O=100, F=3, split=0.5 -> withdrawable 126.50, score 23.50
        let fx = fixture("150", "100", "3", false).await;
        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let breakdown = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(breakdown.profit, dec("47"));
        assert_eq!(breakdown.to_withdrawable, dec("126.50"));
        assert_eq!(breakdown.to_score, dec("23.50"));

        let seller = fx.store.account(10).await.unwrap().unwrap();
        assert_eq!(seller.withdrawable, dec("126.50"));
        assert_eq!(seller.score, dec("23.50"));
    }

    #[tokio::test]
    async fn test_split_conserves_every_cent() {
        // Odd-cent profit: P=100.01, O=50, F=0.02 -> profit=49.99
        // share=round2(24.995)=25.00, score=24.99
        let fx = fixture("100.01", "50", "0.02", false).await;
        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let b = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(
            b.to_withdrawable + b.to_score,
            b.profit + b.principal + b.service_fee
        );
        assert_eq!(b.to_withdrawable, dec("75.02"));
        assert_eq!(b.to_score, dec("24.99"));
    }

    #[tokio::test]
    async fn test_sale_below_cost_pays_principal_only() {
        // P=90, O=100, F=3 -> profit clamped to 0
        let fx = fixture("90", "100", "3", false).await;
        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let b = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(b.profit, Decimal::ZERO);
        assert_eq!(b.to_withdrawable, dec("103"));
        assert_eq!(b.to_score, Decimal::ZERO);
        assert!(b.commissions.is_empty());
    }

    #[tokio::test]
    async fn test_legacy_asset_splits_principal_and_forces_zero_profit() {
        let fx = fixture("500", "100", "0", true).await;
        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let b = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert!(b.legacy);
        assert_eq!(b.profit, Decimal::ZERO);
        assert_eq!(b.to_withdrawable, dec("50"));
        assert_eq!(b.to_score, dec("50"));
        assert!(b.commissions.is_empty());

        let seller = fx.store.account(10).await.unwrap().unwrap();
        assert_eq!(seller.withdrawable, dec("50"));
        assert_eq!(seller.score, dec("50"));
    }

    #[tokio::test]
    async fn test_second_distribution_is_rejected() {
        let fx = fixture("150", "100", "3", false).await;
        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        let mut txn = fx.store.begin().await.unwrap();
        let err = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-2")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadySettled(_)));
        // Release the failed transaction (rolls back) before reading the store,
        // mirroring every sibling test; the in-memory store holds a single
        // lock for a txn's lifetime, so an open txn would block the read.
        txn.rollback().await.unwrap();

        // Seller credited exactly once
        let seller = fx.store.account(10).await.unwrap().unwrap();
        assert_eq!(seller.withdrawable, dec("126.50"));
    }

    #[tokio::test]
    async fn test_commission_cascade_three_levels() {
        let fx = fixture("150", "100", "3", false).await;
        // Referral chain: 10 <- 11 <- 12 <- 13 (and 13 <- 14, beyond reach)
        fx.store.seed_inviter(10, 11).await;
        fx.store.seed_inviter(11, 12).await;
        fx.store.seed_inviter(12, 13).await;
        fx.store.seed_inviter(13, 14).await;

        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let b = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        // profit 47: L1 5% = 2.35, L2 3% = 1.41, L3 1% = 0.47
        assert_eq!(
            b.commissions,
            vec![
                CommissionLeg { level: 1, beneficiary: 11, rate: dec("0.05"), amount: dec("2.35") },
                CommissionLeg { level: 2, beneficiary: 12, rate: dec("0.03"), amount: dec("1.41") },
                CommissionLeg { level: 3, beneficiary: 13, rate: dec("0.01"), amount: dec("0.47") },
            ]
        );
        assert_eq!(
            fx.store.account(11).await.unwrap().unwrap().withdrawable,
            dec("2.35")
        );
        assert_eq!(
            fx.store.account(13).await.unwrap().unwrap().withdrawable,
            dec("0.47")
        );
        assert!(fx.store.account(14).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commission_chain_stops_at_missing_inviter() {
        let fx = fixture("150", "100", "3", false).await;
        fx.store.seed_inviter(10, 11).await; // one level only

        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let b = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        assert_eq!(b.commissions.len(), 1);
        assert_eq!(b.commissions[0].beneficiary, 11);
    }

    #[tokio::test]
    async fn test_zero_mid_level_rate_skips_but_continues() {
        let fx = fixture("150", "100", "3", false).await;
        fx.store.seed_inviter(10, 11).await;
        fx.store.seed_inviter(11, 12).await;

        let mut rules = TradeRules::default();
        rules.commission_rates = vec![Decimal::ZERO, dec("0.03"), dec("0.01")];
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        let b = distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        txn.commit().await.unwrap();

        // Level 1 skipped, level 2 still paid to user 12
        assert_eq!(b.commissions.len(), 1);
        assert_eq!(b.commissions[0].level, 2);
        assert_eq!(b.commissions[0].beneficiary, 12);
    }

    #[tokio::test]
    async fn test_snapshot_is_frozen_on_listing() {
        let fx = fixture("150", "100", "3", false).await;
        let rules = TradeRules::default();
        let clock = clock();
        let distributor = SettlementDistributor::new(&rules, &clock);

        let mut txn = fx.store.begin().await.unwrap();
        distributor
            .distribute(txn.as_mut(), fx.consignment_id, &fx.order, "batch-1")
            .await
            .unwrap();
        let listing = txn.consignment_for_update(fx.consignment_id).await.unwrap();
        txn.commit().await.unwrap();

        assert!(listing.settled_at.is_some());
        let snapshot: SettlementBreakdown =
            serde_json::from_str(listing.settlement_snapshot.as_deref().unwrap()).unwrap();
        assert_eq!(snapshot.to_withdrawable, dec("126.50"));
        assert_eq!(snapshot.split_rate, dec("0.5"));
    }
}
