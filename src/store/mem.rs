//! In-memory store
//!
//! Implements the [`Store`]/[`StoreTxn`] traits over plain maps so the
//! matching and settlement logic can be exercised without PostgreSQL.
//! A transaction takes the single state lock for its whole lifetime
//! (single-writer, like the row locks it stands in for), snapshots the
//! state at begin, and restores the snapshot on drop unless committed —
//! the same rollback-on-drop semantics as a sqlx transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::core_types::{
    BuyOrderId, ConsignmentId, EntryId, HoldingId, ItemId, OrderId, PackageId, SessionId, UserId,
    ZoneId,
};
use crate::error::{CoreError, Result};
use crate::models::{
    Account, AppreciationEvent, Bucket, BuyOrder, BuyOrderStatus, ConsignmentListing,
    ConsignmentStatus, DeliveryStatus, Holding, Item, LedgerEntry, LedgerReason, Order,
    OrderStatus, Session, Zone,
};
use crate::money::round2;
use crate::store::{Store, StoreTxn};

#[derive(Debug, Default, Clone)]
struct MemState {
    sessions: FxHashMap<SessionId, Session>,
    zones: FxHashMap<ZoneId, Zone>,
    items: FxHashMap<ItemId, Item>,
    inviters: FxHashMap<UserId, UserId>,
    accounts: FxHashMap<UserId, Account>,
    buy_orders: FxHashMap<BuyOrderId, BuyOrder>,
    consignments: FxHashMap<ConsignmentId, ConsignmentListing>,
    holdings: FxHashMap<HoldingId, Holding>,
    orders: FxHashMap<OrderId, Order>,
    ledger: Vec<LedgerEntry>,
    appreciations: Vec<AppreciationEvent>,
    next_id: u64,
}

impl MemState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory store handle; cheap to clone, shared state behind one lock
#[derive(Clone, Default)]
pub struct MemStore {
    state: Arc<Mutex<MemState>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding (test fixtures) ---

    pub async fn seed_session(&self, session: Session) {
        let mut state = self.state.lock().await;
        state.sessions.insert(session.session_id, session);
    }

    pub async fn seed_zone(&self, floor: Decimal, ceiling: Decimal) -> ZoneId {
        let mut state = self.state.lock().await;
        let zone_id = state.next_id();
        state.zones.insert(zone_id, Zone { zone_id, floor, ceiling });
        zone_id
    }

    pub async fn seed_item(&self, item: Item) {
        let mut state = self.state.lock().await;
        state.items.insert(item.item_id, item);
    }

    /// Top up a bucket, writing the matching ledger entry so the user's
    /// history replays cleanly from zero
    pub async fn seed_balance(&self, user_id: UserId, bucket: Bucket, amount: Decimal) {
        let mut state = self.state.lock().await;
        let before = state
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::empty(user_id))
            .bucket(bucket);
        let after = round2(before + amount);
        state
            .accounts
            .get_mut(&user_id)
            .expect("account just inserted")
            .set_bucket(bucket, after);

        let entry_id = state.next_id();
        state.ledger.push(LedgerEntry {
            entry_id,
            user_id,
            bucket,
            delta: round2(amount),
            before,
            after,
            reason: LedgerReason::Adjust,
            biz_id: 0,
            memo: "seed balance".into(),
            flow_no: "seed".into(),
            batch_no: "seed".into(),
            created_at: Utc::now(),
        });
    }

    pub async fn seed_holding(&self, mut holding: Holding) -> HoldingId {
        let mut state = self.state.lock().await;
        if holding.holding_id == 0 {
            holding.holding_id = state.next_id();
        }
        let id = holding.holding_id;
        state.holdings.insert(id, holding);
        id
    }

    pub async fn seed_consignment(&self, mut listing: ConsignmentListing) -> ConsignmentId {
        let mut state = self.state.lock().await;
        if listing.consignment_id == 0 {
            listing.consignment_id = state.next_id();
        }
        let id = listing.consignment_id;
        state.consignments.insert(id, listing);
        id
    }

    pub async fn seed_inviter(&self, user_id: UserId, inviter_id: UserId) {
        let mut state = self.state.lock().await;
        state.inviters.insert(user_id, inviter_id);
    }

    /// Record a historical paid trade for an item (previous-trade lookups)
    pub async fn seed_trade_time(&self, item_id: ItemId, at: DateTime<Utc>) -> OrderId {
        let mut state = self.state.lock().await;
        let order_id = state.next_id();
        state.orders.insert(
            order_id,
            Order {
                order_id,
                buy_order_id: 0,
                buyer_id: 0,
                item_id,
                session_id: 0,
                zone_id: 0,
                price: Decimal::ZERO,
                consignment_id: None,
                status: OrderStatus::Paid,
                created_at: at,
            },
        );
        order_id
    }

    /// All appreciation audit rows, in insertion order
    pub async fn appreciation_log(&self) -> Vec<AppreciationEvent> {
        self.state.lock().await.appreciations.clone()
    }

    pub async fn buy_order(&self, buy_order_id: BuyOrderId) -> Option<BuyOrder> {
        self.state.lock().await.buy_orders.get(&buy_order_id).cloned()
    }

    pub async fn consignment(&self, consignment_id: ConsignmentId) -> Option<ConsignmentListing> {
        self.state.lock().await.consignments.get(&consignment_id).cloned()
    }

    pub async fn holding(&self, holding_id: HoldingId) -> Option<Holding> {
        self.state.lock().await.holdings.get(&holding_id).cloned()
    }

    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    /// Holdings owned by a user, ordered by id
    pub async fn holdings_of(&self, user_id: UserId) -> Vec<Holding> {
        let state = self.state.lock().await;
        let mut list: Vec<Holding> = state
            .holdings
            .values()
            .filter(|h| h.owner_id == user_id)
            .cloned()
            .collect();
        list.sort_by_key(|h| h.holding_id);
        list
    }
}

/// One in-flight transaction: holds the state lock, restores the snapshot
/// on drop unless committed
pub struct MemTxn {
    guard: OwnedMutexGuard<MemState>,
    snapshot: Option<MemState>,
    committed: bool,
}

impl Drop for MemTxn {
    fn drop(&mut self) {
        if !self.committed {
            if let Some(snapshot) = self.snapshot.take() {
                *self.guard = snapshot;
            }
        }
    }
}

impl MemTxn {
    fn not_found(entity: &'static str, id: u64) -> CoreError {
        CoreError::NotFound { entity, id }
    }
}

#[async_trait]
impl StoreTxn for MemTxn {
    async fn account_for_update(&mut self, user_id: UserId) -> Result<Account> {
        Ok(self
            .guard
            .accounts
            .entry(user_id)
            .or_insert_with(|| Account::empty(user_id))
            .clone())
    }

    async fn update_account(&mut self, account: &Account) -> Result<()> {
        self.guard.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<EntryId> {
        let entry_id = self.guard.next_id();
        let mut entry = entry.clone();
        entry.entry_id = entry_id;
        self.guard.ledger.push(entry);
        Ok(entry_id)
    }

    async fn buy_order_for_update(&mut self, buy_order_id: BuyOrderId) -> Result<BuyOrder> {
        self.guard
            .buy_orders
            .get(&buy_order_id)
            .cloned()
            .ok_or_else(|| Self::not_found("buy_order", buy_order_id))
    }

    async fn update_buy_order(&mut self, order: &BuyOrder) -> Result<()> {
        self.guard.buy_orders.insert(order.buy_order_id, order.clone());
        Ok(())
    }

    async fn insert_buy_order(&mut self, order: &BuyOrder) -> Result<BuyOrderId> {
        let buy_order_id = self.guard.next_id();
        let mut order = order.clone();
        order.buy_order_id = buy_order_id;
        self.guard.buy_orders.insert(buy_order_id, order);
        Ok(buy_order_id)
    }

    async fn item_for_update(&mut self, item_id: ItemId) -> Result<Item> {
        self.guard
            .items
            .get(&item_id)
            .cloned()
            .ok_or_else(|| Self::not_found("item", item_id))
    }

    async fn update_item(&mut self, item: &Item) -> Result<()> {
        self.guard.items.insert(item.item_id, item.clone());
        Ok(())
    }

    async fn consignment_for_update(
        &mut self,
        consignment_id: ConsignmentId,
    ) -> Result<ConsignmentListing> {
        self.guard
            .consignments
            .get(&consignment_id)
            .cloned()
            .ok_or_else(|| Self::not_found("consignment", consignment_id))
    }

    async fn update_consignment(&mut self, listing: &ConsignmentListing) -> Result<()> {
        self.guard
            .consignments
            .insert(listing.consignment_id, listing.clone());
        Ok(())
    }

    async fn insert_consignment(&mut self, listing: &ConsignmentListing) -> Result<ConsignmentId> {
        let consignment_id = self.guard.next_id();
        let mut listing = listing.clone();
        listing.consignment_id = consignment_id;
        self.guard.consignments.insert(consignment_id, listing);
        Ok(consignment_id)
    }

    async fn holding_for_update(&mut self, holding_id: HoldingId) -> Result<Holding> {
        self.guard
            .holdings
            .get(&holding_id)
            .cloned()
            .ok_or_else(|| Self::not_found("holding", holding_id))
    }

    async fn update_holding(&mut self, holding: &Holding) -> Result<()> {
        self.guard.holdings.insert(holding.holding_id, holding.clone());
        Ok(())
    }

    async fn insert_holding(&mut self, holding: &Holding) -> Result<HoldingId> {
        let holding_id = self.guard.next_id();
        let mut holding = holding.clone();
        holding.holding_id = holding_id;
        self.guard.holdings.insert(holding_id, holding);
        Ok(holding_id)
    }

    async fn insert_order(&mut self, order: &Order) -> Result<OrderId> {
        let order_id = self.guard.next_id();
        let mut order = order.clone();
        order.order_id = order_id;
        self.guard.orders.insert(order_id, order);
        Ok(order_id)
    }

    async fn last_trade_at(
        &mut self,
        item_id: ItemId,
        exclude_order: OrderId,
    ) -> Result<Option<DateTime<Utc>>> {
        let from_orders = self
            .guard
            .orders
            .values()
            .filter(|o| {
                o.item_id == item_id
                    && o.order_id != exclude_order
                    && o.status == OrderStatus::Paid
            })
            .map(|o| o.created_at)
            .max();
        if from_orders.is_some() {
            return Ok(from_orders);
        }

        Ok(self
            .guard
            .holdings
            .values()
            .filter(|h| {
                h.item_id == item_id
                    && h.source_order_id != exclude_order
                    && h.delivery == DeliveryStatus::Delivered
            })
            .map(|h| h.acquired_at)
            .max())
    }

    async fn inviter_of(&mut self, user_id: UserId) -> Result<Option<UserId>> {
        Ok(self.guard.inviters.get(&user_id).copied())
    }

    async fn find_zone(&mut self, price: Decimal) -> Result<Option<Zone>> {
        Ok(self
            .guard
            .zones
            .values()
            .find(|z| z.contains(price))
            .cloned())
    }

    async fn insert_zone(&mut self, floor: Decimal, ceiling: Decimal) -> Result<Zone> {
        let zone_id = self.guard.next_id();
        let zone = Zone { zone_id, floor, ceiling };
        self.guard.zones.insert(zone_id, zone.clone());
        Ok(zone)
    }

    async fn insert_appreciation(&mut self, event: &AppreciationEvent) -> Result<()> {
        self.guard.appreciations.push(event.clone());
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        // Drop restores the snapshot
        Ok(())
    }
}

#[async_trait]
impl Store for MemStore {
    async fn begin(&self) -> Result<Box<dyn StoreTxn + '_>> {
        let guard = self.state.clone().lock_owned().await;
        let snapshot = Some(guard.clone());
        Ok(Box::new(MemTxn {
            guard,
            snapshot,
            committed: false,
        }))
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&session_id).cloned())
    }

    async fn item(&self, item_id: ItemId) -> Result<Option<Item>> {
        Ok(self.state.lock().await.items.get(&item_id).cloned())
    }

    async fn zone(&self, zone_id: ZoneId) -> Result<Option<Zone>> {
        Ok(self.state.lock().await.zones.get(&zone_id).cloned())
    }

    async fn account(&self, user_id: UserId) -> Result<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&user_id).cloned())
    }

    async fn pending_buy_orders(
        &self,
        session_id: SessionId,
        package_id: Option<PackageId>,
        zone_id: Option<ZoneId>,
    ) -> Result<Vec<BuyOrder>> {
        let state = self.state.lock().await;
        let mut orders: Vec<BuyOrder> = state
            .buy_orders
            .values()
            .filter(|o| o.session_id == session_id && o.status == BuyOrderStatus::Pending)
            .filter(|o| zone_id.is_none_or(|z| o.zone_id == z))
            .filter(|o| {
                package_id.is_none_or(|p| {
                    state
                        .items
                        .get(&o.item_id)
                        .map(|i| i.package_id == p)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| {
            b.weight
                .cmp(&a.weight)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.buy_order_id.cmp(&b.buy_order_id))
        });
        Ok(orders)
    }

    async fn selling_consignments(&self, item_id: ItemId) -> Result<Vec<ConsignmentListing>> {
        let state = self.state.lock().await;
        let mut listings: Vec<ConsignmentListing> = state
            .consignments
            .values()
            .filter(|c| c.item_id == item_id && c.status == ConsignmentStatus::Selling)
            .cloned()
            .collect();
        listings.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.consignment_id.cmp(&b.consignment_id))
        });
        Ok(listings)
    }

    async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_txn_rolls_back_on_drop() {
        let store = MemStore::new();
        {
            let mut txn = store.begin().await.unwrap();
            let mut account = txn.account_for_update(1).await.unwrap();
            account.available = Decimal::from(100);
            txn.update_account(&account).await.unwrap();
            // Dropped without commit
        }
        assert!(store.account(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_committed_txn_persists() {
        let store = MemStore::new();
        {
            let mut txn = store.begin().await.unwrap();
            let mut account = txn.account_for_update(1).await.unwrap();
            account.available = Decimal::from(100);
            txn.update_account(&account).await.unwrap();
            txn.commit().await.unwrap();
        }
        let account = store.account(1).await.unwrap().unwrap();
        assert_eq!(account.available, Decimal::from(100));
    }

    #[tokio::test]
    async fn test_explicit_rollback() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        txn.account_for_update(1).await.unwrap();
        txn.rollback().await.unwrap();
        assert!(store.account(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_sequential_per_store() {
        let store = MemStore::new();
        let z1 = store.seed_zone(Decimal::ZERO, Decimal::from(1000)).await;
        let z2 = store
            .seed_zone(Decimal::from(1000), Decimal::from(2000))
            .await;
        assert_eq!(z1, 1);
        assert_eq!(z2, 2);
    }

    #[tokio::test]
    async fn test_missing_rows_are_not_found() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        assert!(matches!(
            txn.item_for_update(5).await,
            Err(CoreError::NotFound { entity: "item", .. })
        ));
        assert!(matches!(
            txn.consignment_for_update(5).await,
            Err(CoreError::NotFound { .. })
        ));
    }
}
