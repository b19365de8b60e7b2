//! Pool matcher
//!
//! The batch entry point: for one session (optionally narrowed to a package
//! or zone), groups pending buy orders by item+zone, sizes each group's
//! supply (official stock + in-zone consignments), runs the weighted
//! selector, drives the trade executor for winners and the refund path for
//! losers, and off-shelves consignments the run left unmatched.
//!
//! Groups are processed sequentially; orders within a group share supply and
//! are never parallelized.

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::assets::SupplySource;
use crate::clock::Clock;
use crate::collaborators::PurchaseCollaborator;
use crate::config::TradeRules;
use crate::consignment::ConsignmentRegistry;
use crate::core_types::{ItemId, PackageId, SessionId, ZoneId};
use crate::error::Result;
use crate::executor::TradeExecutor;
use crate::market::MarketService;
use crate::models::{BuyOrder, ConsignmentListing, ItemStatus};
use crate::selector::{Candidate, Selector};
use crate::store::Store;

/// Counts returned to the scheduler that triggered the run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: u64,
    pub failed: u64,
    pub refunded: u64,
    pub off_shelf: u64,
}

pub struct PoolMatcher<'a> {
    store: &'a dyn Store,
    rules: &'a TradeRules,
    clock: &'a dyn Clock,
    collaborator: &'a dyn PurchaseCollaborator,
}

impl<'a> PoolMatcher<'a> {
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

    /// Run one matching batch. `package_id`/`zone_id` of 0 mean "the whole
    /// session" (the scheduler's calling convention).
    pub async fn run<R: Rng>(
        &self,
        session_id: SessionId,
        package_id: PackageId,
        zone_id: ZoneId,
        rng: &mut R,
    ) -> Result<MatchOutcome> {
        MarketService::open_session(self.store, session_id).await?;

        let batch_no = ulid::Ulid::new().to_string();
        let package_filter = (package_id != 0).then_some(package_id);
        let zone_filter = (zone_id != 0).then_some(zone_id);

        let pending = self
            .store
            .pending_buy_orders(session_id, package_filter, zone_filter)
            .await?;
        tracing::info!(
            session_id,
            package_id,
            zone_id,
            pending = pending.len(),
            batch_no = %batch_no,
            "pool matching started"
        );

        // Group by (item, zone), keeping the (weight desc, created asc)
        // order inside each group
        let mut groups: FxHashMap<(ItemId, ZoneId), Vec<BuyOrder>> = FxHashMap::default();
        for order in pending {
            groups
                .entry((order.item_id, order.zone_id))
                .or_default()
                .push(order);
        }
        let mut keys: Vec<(ItemId, ZoneId)> = groups.keys().copied().collect();
        keys.sort_unstable();

        let executor = TradeExecutor::new(self.store, self.rules, self.clock, self.collaborator);
        let mut outcome = MatchOutcome::default();

        for key in keys {
            let orders = &groups[&key];
            let group = self
                .match_group(&executor, key, orders, &batch_no, rng)
                .await;
            outcome.matched += group.matched;
            outcome.failed += group.failed;
            outcome.refunded += group.refunded;
            outcome.off_shelf += group.off_shelf;
        }

        tracing::info!(
            session_id,
            matched = outcome.matched,
            failed = outcome.failed,
            refunded = outcome.refunded,
            off_shelf = outcome.off_shelf,
            batch_no = %batch_no,
            "pool matching finished"
        );
        Ok(outcome)
    }

    async fn match_group<R: Rng>(
        &self,
        executor: &TradeExecutor<'_>,
        (item_id, zone_id): (ItemId, ZoneId),
        orders: &[BuyOrder],
        batch_no: &str,
        rng: &mut R,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();

        // Supply: official stock of an active item plus its selling
        // consignments priced inside the group's zone bracket
        let item = match self.store.item(item_id).await {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(item_id, zone_id, error = %e, "item load failed, refunding group");
                self.refund_all(executor, orders, batch_no, &mut outcome).await;
                return outcome;
            }
        };
        let stock = item
            .as_ref()
            .filter(|i| i.status == ItemStatus::Active)
            .map(|i| i.stock.max(0) as usize)
            .unwrap_or(0);

        let consignments = match self.load_consignments(item_id, zone_id).await {
            Ok(list) => list,
            Err(e) => {
                tracing::error!(item_id, zone_id, error = %e, "consignment load failed, refunding group");
                self.refund_all(executor, orders, batch_no, &mut outcome).await;
                return outcome;
            }
        };

        let supply = stock + consignments.len();
        tracing::debug!(item_id, zone_id, stock, consignments = consignments.len(), orders = orders.len(), "group sized");

        if supply == 0 {
            self.refund_all(executor, orders, batch_no, &mut outcome).await;
            return outcome;
        }

        let k = orders.len().min(supply);
        let candidates: Vec<Candidate> = orders
            .iter()
            .map(|o| Candidate {
                id: o.buy_order_id,
                weight: o.weight,
                created_at: o.created_at,
            })
            .collect();
        let selector = Selector::new(self.rules.tie_break);
        let winner_ids: Vec<u64> = selector.select(&candidates, k, rng);

        // Winners consume supply in registration order: official stock
        // first, then consignments in listing-creation order
        let mut stock_left = stock;
        let mut consignment_iter = consignments.iter();
        let mut sold_ids: Vec<u64> = Vec::new();

        for order in orders {
            if !winner_ids.contains(&order.buy_order_id) {
                self.refund_one(executor, order, batch_no, &mut outcome).await;
                continue;
            }

            let source = if stock_left > 0 {
                stock_left -= 1;
                SupplySource::Stock
            } else {
                match consignment_iter.next() {
                    Some(listing) => SupplySource::Consignment {
                        consignment_id: listing.consignment_id,
                        seller_id: listing.seller_id,
                    },
                    None => {
                        // Winner count never exceeds supply; running out is a bug
                        tracing::error!(item_id, zone_id, "winner without supply unit");
                        self.refund_one(executor, order, batch_no, &mut outcome).await;
                        continue;
                    }
                }
            };

            match executor.execute(order, &source, batch_no).await {
                Ok(_) => {
                    outcome.matched += 1;
                    if let SupplySource::Consignment { consignment_id, .. } = source {
                        sold_ids.push(consignment_id);
                    }
                }
                Err(e) => {
                    if e.is_business() {
                        tracing::warn!(
                            buy_order_id = order.buy_order_id,
                            item_id,
                            error = %e,
                            "trade rejected, refunding"
                        );
                    } else {
                        tracing::error!(
                            buy_order_id = order.buy_order_id,
                            item_id,
                            stage = "execute",
                            error = %e,
                            "trade failed, refunding"
                        );
                    }
                    outcome.failed += 1;
                    self.refund_one(executor, order, batch_no, &mut outcome).await;
                }
            }
        }

        // Consignments loaded for this run but not sold: the session closed
        // without matching them; off-shelf with a free-relist grant
        for listing in consignments
            .iter()
            .filter(|l| !sold_ids.contains(&l.consignment_id))
        {
            match self.off_shelf(listing).await {
                Ok(()) => outcome.off_shelf += 1,
                Err(e) => {
                    tracing::error!(
                        consignment_id = listing.consignment_id,
                        error = %e,
                        "off-shelf failed"
                    );
                }
            }
        }

        outcome
    }

    /// Selling consignments for the item whose asking price falls inside the
    /// group zone's bracket; without a zone row, no price filter applies
    async fn load_consignments(
        &self,
        item_id: ItemId,
        zone_id: ZoneId,
    ) -> Result<Vec<ConsignmentListing>> {
        let zone = self.store.zone(zone_id).await?;
        let mut listings = self.store.selling_consignments(item_id).await?;
        if let Some(zone) = zone {
            listings.retain(|l| zone.contains(l.price));
        }
        Ok(listings)
    }

    async fn refund_all(
        &self,
        executor: &TradeExecutor<'_>,
        orders: &[BuyOrder],
        batch_no: &str,
        outcome: &mut MatchOutcome,
    ) {
        for order in orders {
            self.refund_one(executor, order, batch_no, outcome).await;
        }
    }

    async fn refund_one(
        &self,
        executor: &TradeExecutor<'_>,
        order: &BuyOrder,
        batch_no: &str,
        outcome: &mut MatchOutcome,
    ) {
        match executor.refund(order, batch_no).await {
            Ok(()) => outcome.refunded += 1,
            Err(e) => {
                tracing::error!(
                    buy_order_id = order.buy_order_id,
                    stage = "refund",
                    error = %e,
                    "refund failed"
                );
                outcome.failed += 1;
            }
        }
    }

    async fn off_shelf(&self, listing: &ConsignmentListing) -> Result<()> {
        let mut txn = self.store.begin().await?;
        ConsignmentRegistry::off_shelf(
            txn.as_mut(),
            listing.consignment_id,
            true,
            "session closed without match",
        )
        .await?;
        txn.commit().await
    }
}
