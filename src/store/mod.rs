//! Storage interfaces
//!
//! The matching/settlement services operate against these narrow traits so
//! the whole engine runs unmodified over PostgreSQL ([`PgStore`]) or the
//! in-memory store ([`MemStore`]) used by tests.
//!
//! # Locking
//!
//! Every `*_for_update` call row-locks the record for the lifetime of the
//! transaction. Lock acquisition follows one global order:
//!
//! `accounts (ascending user id) -> buy order -> item -> consignment ->
//! holding -> payout accounts`
//!
//! A transaction that needs records of several kinds MUST acquire them in
//! that order. One exception: consignment creation enters through the
//! holding (the item is only known after reading it), so it locks holding
//! before item; a conflict with a concurrent batch trade aborts one of the
//! two transactions, which surfaces as an isolated per-request failure.

pub mod mem;
pub mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::{
    BuyOrderId, ConsignmentId, EntryId, HoldingId, ItemId, OrderId, PackageId, SessionId, UserId,
    ZoneId,
};
use crate::error::Result;
use crate::models::{
    Account, AppreciationEvent, BuyOrder, ConsignmentListing, Holding, Item, LedgerEntry, Order,
    Session, Zone,
};

/// One storage transaction. Mutations are invisible to other transactions
/// until [`StoreTxn::commit`]; dropping the transaction rolls it back.
#[async_trait]
pub trait StoreTxn: Send {
    // --- accounts ---

    /// Lock the user's account row, creating an empty account on first use
    async fn account_for_update(&mut self, user_id: UserId) -> Result<Account>;
    async fn update_account(&mut self, account: &Account) -> Result<()>;

    // --- ledger ---

    async fn insert_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<EntryId>;

    // --- buy orders ---

    async fn buy_order_for_update(&mut self, buy_order_id: BuyOrderId) -> Result<BuyOrder>;
    async fn update_buy_order(&mut self, order: &BuyOrder) -> Result<()>;
    async fn insert_buy_order(&mut self, order: &BuyOrder) -> Result<BuyOrderId>;

    // --- items ---

    async fn item_for_update(&mut self, item_id: ItemId) -> Result<Item>;
    async fn update_item(&mut self, item: &Item) -> Result<()>;

    // --- consignments ---

    async fn consignment_for_update(
        &mut self,
        consignment_id: ConsignmentId,
    ) -> Result<ConsignmentListing>;
    async fn update_consignment(&mut self, listing: &ConsignmentListing) -> Result<()>;
    async fn insert_consignment(&mut self, listing: &ConsignmentListing) -> Result<ConsignmentId>;

    // --- holdings ---

    async fn holding_for_update(&mut self, holding_id: HoldingId) -> Result<Holding>;
    async fn update_holding(&mut self, holding: &Holding) -> Result<()>;
    async fn insert_holding(&mut self, holding: &Holding) -> Result<HoldingId>;

    // --- settlement orders ---

    async fn insert_order(&mut self, order: &Order) -> Result<OrderId>;

    /// Latest paid-trade time for an item, excluding the given order;
    /// falls back to the latest delivered holding's acquisition time
    async fn last_trade_at(
        &mut self,
        item_id: ItemId,
        exclude_order: OrderId,
    ) -> Result<Option<DateTime<Utc>>>;

    // --- referral graph (read-only) ---

    async fn inviter_of(&mut self, user_id: UserId) -> Result<Option<UserId>>;

    // --- zones ---

    async fn find_zone(&mut self, price: Decimal) -> Result<Option<Zone>>;
    async fn insert_zone(&mut self, floor: Decimal, ceiling: Decimal) -> Result<Zone>;

    // --- audit ---

    async fn insert_appreciation(&mut self, event: &AppreciationEvent) -> Result<()>;

    // --- lifecycle ---

    async fn commit(self: Box<Self>) -> Result<()>;
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Store handle: read paths used by the matcher's load phase plus the
/// transaction factory
#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTxn + '_>>;

    async fn session(&self, session_id: SessionId) -> Result<Option<Session>>;
    async fn item(&self, item_id: ItemId) -> Result<Option<Item>>;
    async fn zone(&self, zone_id: ZoneId) -> Result<Option<Zone>>;
    async fn account(&self, user_id: UserId) -> Result<Option<Account>>;

    /// Pending pool entries in scope, ordered (weight desc, created asc, id asc).
    /// `package_id`/`zone_id` of `None` mean no filter.
    async fn pending_buy_orders(
        &self,
        session_id: SessionId,
        package_id: Option<PackageId>,
        zone_id: Option<ZoneId>,
    ) -> Result<Vec<BuyOrder>>;

    /// Selling consignments for an item, ordered (created asc, id asc)
    async fn selling_consignments(&self, item_id: ItemId) -> Result<Vec<ConsignmentListing>>;

    /// A user's ledger entries in insertion order (audit path)
    async fn ledger_entries(&self, user_id: UserId) -> Result<Vec<LedgerEntry>>;
}
