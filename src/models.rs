//! Domain entities and status codes
//!
//! Status IDs are stored as SMALLINT in PostgreSQL and must be preserved
//! exactly — they are shared with existing data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;

use crate::core_types::{
    BuyOrderId, ConsignmentId, HoldingId, ItemId, OrderId, PackageId, SessionId, UserId, ZoneId,
};
use crate::money::round2;

// ============================================================
// STATUS ENUMS
// ============================================================

/// Trading session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum SessionStatus {
    Closed = 0,
    Open = 1,
}

impl SessionStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SessionStatus::Closed),
            1 => Some(SessionStatus::Open),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Closed => "CLOSED",
            SessionStatus::Open => "OPEN",
        }
    }
}

/// Item (official listing) status
///
/// An item auto-disables when its stock reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ItemStatus {
    Inactive = 0,
    Active = 1,
}

impl ItemStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ItemStatus::Inactive),
            1 => Some(ItemStatus::Active),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Inactive => "INACTIVE",
            ItemStatus::Active => "ACTIVE",
        }
    }
}

/// Buy order (pool entry) status
///
/// Terminal states: MATCHED, REFUNDED. A pending order is the only
/// cancellable form; the batch never revisits a terminal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum BuyOrderStatus {
    Pending = 0,
    Matched = 1,
    Refunded = 2,
}

impl BuyOrderStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, BuyOrderStatus::Matched | BuyOrderStatus::Refunded)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(BuyOrderStatus::Pending),
            1 => Some(BuyOrderStatus::Matched),
            2 => Some(BuyOrderStatus::Refunded),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuyOrderStatus::Pending => "PENDING",
            BuyOrderStatus::Matched => "MATCHED",
            BuyOrderStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for BuyOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Consignment listing status
///
/// `SELLING -> {SOLD, CANCELLED, OFF_SHELF}` — the three non-selling states
/// are terminal for the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum ConsignmentStatus {
    Cancelled = 0,
    Selling = 1,
    Sold = 2,
    OffShelf = 3,
}

impl ConsignmentStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConsignmentStatus::Selling)
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(ConsignmentStatus::Cancelled),
            1 => Some(ConsignmentStatus::Selling),
            2 => Some(ConsignmentStatus::Sold),
            3 => Some(ConsignmentStatus::OffShelf),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsignmentStatus::Cancelled => "CANCELLED",
            ConsignmentStatus::Selling => "SELLING",
            ConsignmentStatus::Sold => "SOLD",
            ConsignmentStatus::OffShelf => "OFF_SHELF",
        }
    }

    /// The holding-side mirror of this listing status
    pub fn holding_status(&self) -> HoldingConsignStatus {
        match self {
            ConsignmentStatus::Selling => HoldingConsignStatus::Selling,
            ConsignmentStatus::Sold => HoldingConsignStatus::Sold,
            ConsignmentStatus::Cancelled | ConsignmentStatus::OffShelf => {
                HoldingConsignStatus::None
            }
        }
    }
}

impl fmt::Display for ConsignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Consignment status mirrored onto the holding record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum HoldingConsignStatus {
    None = 0,
    Selling = 1,
    Sold = 2,
}

impl HoldingConsignStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(HoldingConsignStatus::None),
            1 => Some(HoldingConsignStatus::Selling),
            2 => Some(HoldingConsignStatus::Sold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HoldingConsignStatus::None => "NONE",
            HoldingConsignStatus::Selling => "SELLING",
            HoldingConsignStatus::Sold => "SOLD",
        }
    }
}

/// Holding delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum DeliveryStatus {
    Pending = 0,
    Delivered = 1,
}

impl DeliveryStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(DeliveryStatus::Pending),
            1 => Some(DeliveryStatus::Delivered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Delivered => "DELIVERED",
        }
    }
}

/// Settlement order status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum OrderStatus {
    Paid = 1,
}

impl OrderStatus {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(OrderStatus::Paid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Paid => "PAID",
        }
    }
}

// ============================================================
// ACCOUNT BUCKETS
// ============================================================

/// The four independent balance buckets per user account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum Bucket {
    /// Spendable balance for purchases
    Available = 1,
    /// Balance eligible for withdrawal
    Withdrawable = 2,
    /// Consumption credit ("score")
    Score = 3,
    /// Service-fee balance
    ServiceFee = 4,
}

impl Bucket {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Bucket::Available),
            2 => Some(Bucket::Withdrawable),
            3 => Some(Bucket::Score),
            4 => Some(Bucket::ServiceFee),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Available => "AVAILABLE",
            Bucket::Withdrawable => "WITHDRAWABLE",
            Bucket::Score => "SCORE",
            Bucket::ServiceFee => "SERVICE_FEE",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================
// ENTITIES
// ============================================================

/// Trading session
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub title: String,
    pub status: SessionStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Session {
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == SessionStatus::Open
    }
}

/// Price zone — the bracket `[floor, ceiling)` items and listings are
/// grouped into for matching
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    pub zone_id: ZoneId,
    pub floor: Decimal,
    pub ceiling: Decimal,
}

impl Zone {
    #[inline]
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.floor && price < self.ceiling
    }
}

/// Official listing with limited stock
#[derive(Debug, Clone)]
pub struct Item {
    pub item_id: ItemId,
    pub session_id: SessionId,
    pub zone_id: ZoneId,
    pub package_id: PackageId,
    pub title: String,
    pub price: Decimal,
    pub stock: i64,
    pub sales: i64,
    pub status: ItemStatus,
}

/// Pool entry competing for one item+zone during a session
#[derive(Debug, Clone)]
pub struct BuyOrder {
    pub buy_order_id: BuyOrderId,
    pub session_id: SessionId,
    pub item_id: ItemId,
    pub zone_id: ZoneId,
    pub user_id: UserId,
    /// Positive selection weight (priority score)
    pub weight: u32,
    /// Funds escrowed from the available bucket at pool entry; zero when
    /// the buyer entered without a reservation
    pub reserved: Decimal,
    pub status: BuyOrderStatus,
    pub matched_order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
}

/// A seller's offer to resell a previously-bought item
#[derive(Debug, Clone)]
pub struct ConsignmentListing {
    pub consignment_id: ConsignmentId,
    pub seller_id: UserId,
    pub holding_id: HoldingId,
    pub item_id: ItemId,
    pub package_id: PackageId,
    pub zone_id: ZoneId,
    /// Asking price
    pub price: Decimal,
    /// Seller's cost basis (principal), returned in full on resale
    pub original_price: Decimal,
    /// Service fee collected at listing time (0 for legacy assets)
    pub service_fee: Decimal,
    pub status: ConsignmentStatus,
    pub sold_at: Option<DateTime<Utc>>,
    /// Set exactly once by the settlement distributor, under the row lock
    pub settled_at: Option<DateTime<Utc>>,
    /// Serialized settlement breakdown; historical payouts never change
    /// when configuration does
    pub settlement_snapshot: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A user's owned unit of an item
#[derive(Debug, Clone)]
pub struct Holding {
    pub holding_id: HoldingId,
    pub owner_id: UserId,
    pub source_order_id: OrderId,
    pub item_id: ItemId,
    /// Price paid at acquisition
    pub price: Decimal,
    pub consign_status: HoldingConsignStatus,
    pub delivery: DeliveryStatus,
    /// Fee-waived relist credits granted as off-shelf compensation
    pub free_relists: i32,
    /// Originates from the historical unlock flow; settles under
    /// no-fee, principal-split rules
    pub legacy: bool,
    pub acquired_at: DateTime<Utc>,
}

/// Per-user account: four independent buckets, none of which may go negative
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub user_id: UserId,
    pub available: Decimal,
    pub withdrawable: Decimal,
    pub score: Decimal,
    pub service_fee: Decimal,
}

impl Account {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            available: Decimal::ZERO,
            withdrawable: Decimal::ZERO,
            score: Decimal::ZERO,
            service_fee: Decimal::ZERO,
        }
    }

    /// Derived view; never stored as ground truth
    pub fn total_assets(&self) -> Decimal {
        round2(self.available + self.withdrawable + self.score + self.service_fee)
    }

    pub fn bucket(&self, bucket: Bucket) -> Decimal {
        match bucket {
            Bucket::Available => self.available,
            Bucket::Withdrawable => self.withdrawable,
            Bucket::Score => self.score,
            Bucket::ServiceFee => self.service_fee,
        }
    }

    pub fn set_bucket(&mut self, bucket: Bucket, value: Decimal) {
        match bucket {
            Bucket::Available => self.available = value,
            Bucket::Withdrawable => self.withdrawable = value,
            Bucket::Score => self.score = value,
            Bucket::ServiceFee => self.service_fee = value,
        }
    }
}

/// Reason codes attached to ledger entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum LedgerReason {
    PoolReserve = 1,
    PoolRefund = 2,
    ReserveRelease = 3,
    Purchase = 4,
    SellerPrincipal = 5,
    FeeRebate = 6,
    ProfitShare = 7,
    Commission = 8,
    ServiceFee = 9,
    /// Manual/administrative balance adjustment (top-ups, reconciliation)
    Adjust = 10,
}

impl LedgerReason {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(LedgerReason::PoolReserve),
            2 => Some(LedgerReason::PoolRefund),
            3 => Some(LedgerReason::ReserveRelease),
            4 => Some(LedgerReason::Purchase),
            5 => Some(LedgerReason::SellerPrincipal),
            6 => Some(LedgerReason::FeeRebate),
            7 => Some(LedgerReason::ProfitShare),
            8 => Some(LedgerReason::Commission),
            9 => Some(LedgerReason::ServiceFee),
            10 => Some(LedgerReason::Adjust),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::PoolReserve => "POOL_RESERVE",
            LedgerReason::PoolRefund => "POOL_REFUND",
            LedgerReason::ReserveRelease => "RESERVE_RELEASE",
            LedgerReason::Purchase => "PURCHASE",
            LedgerReason::SellerPrincipal => "SELLER_PRINCIPAL",
            LedgerReason::FeeRebate => "FEE_REBATE",
            LedgerReason::ProfitShare => "PROFIT_SHARE",
            LedgerReason::Commission => "COMMISSION",
            LedgerReason::ServiceFee => "SERVICE_FEE",
            LedgerReason::Adjust => "ADJUST",
        }
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Append-only audit row paired with every balance mutation
///
/// Invariant: `after == round2(before + delta)`.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub entry_id: u64,
    pub user_id: UserId,
    pub bucket: Bucket,
    pub delta: Decimal,
    pub before: Decimal,
    pub after: Decimal,
    pub reason: LedgerReason,
    /// Business record the mutation belongs to (order, consignment, ...)
    pub biz_id: u64,
    pub memo: String,
    /// Correlates every leg of one money flow
    pub flow_no: String,
    /// Correlates every flow of one batch run
    pub batch_no: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Check the before/delta/after arithmetic of this entry
    pub fn verify(&self) -> bool {
        self.after == round2(self.before + self.delta)
    }
}

/// Settlement record created when a buy order wins
#[derive(Debug, Clone)]
pub struct Order {
    pub order_id: OrderId,
    pub buy_order_id: BuyOrderId,
    pub buyer_id: UserId,
    pub item_id: ItemId,
    pub session_id: SessionId,
    pub zone_id: ZoneId,
    pub price: Decimal,
    /// None when the fill consumed official stock
    pub consignment_id: Option<ConsignmentId>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// Referral graph node, read-only from the core's perspective
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: UserId,
    pub inviter_id: Option<UserId>,
}

/// Audit row written for every price step-up
#[derive(Debug, Clone)]
pub struct AppreciationEvent {
    pub item_id: ItemId,
    pub old_price: Decimal,
    pub new_price: Decimal,
    pub rate: Decimal,
    pub reason: &'static str,
    pub created_at: DateTime<Utc>,
}

// ============================================================
// TESTS
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_consignment_status_ids() {
        // These numeric codes are shared with existing data
        assert_eq!(ConsignmentStatus::Cancelled.id(), 0);
        assert_eq!(ConsignmentStatus::Selling.id(), 1);
        assert_eq!(ConsignmentStatus::Sold.id(), 2);
        assert_eq!(ConsignmentStatus::OffShelf.id(), 3);
    }

    #[test]
    fn test_consignment_status_roundtrip() {
        for status in [
            ConsignmentStatus::Cancelled,
            ConsignmentStatus::Selling,
            ConsignmentStatus::Sold,
            ConsignmentStatus::OffShelf,
        ] {
            assert_eq!(ConsignmentStatus::from_id(status.id()), Some(status));
        }
        assert_eq!(ConsignmentStatus::from_id(99), None);
    }

    #[test]
    fn test_consignment_terminal_states() {
        assert!(!ConsignmentStatus::Selling.is_terminal());
        assert!(ConsignmentStatus::Sold.is_terminal());
        assert!(ConsignmentStatus::Cancelled.is_terminal());
        assert!(ConsignmentStatus::OffShelf.is_terminal());
    }

    #[test]
    fn test_holding_status_mapping() {
        assert_eq!(
            ConsignmentStatus::Selling.holding_status(),
            HoldingConsignStatus::Selling
        );
        assert_eq!(
            ConsignmentStatus::Sold.holding_status(),
            HoldingConsignStatus::Sold
        );
        assert_eq!(
            ConsignmentStatus::Cancelled.holding_status(),
            HoldingConsignStatus::None
        );
        assert_eq!(
            ConsignmentStatus::OffShelf.holding_status(),
            HoldingConsignStatus::None
        );
    }

    #[test]
    fn test_buy_order_status_roundtrip() {
        for status in [
            BuyOrderStatus::Pending,
            BuyOrderStatus::Matched,
            BuyOrderStatus::Refunded,
        ] {
            assert_eq!(BuyOrderStatus::from_id(status.id()), Some(status));
        }
        assert!(!BuyOrderStatus::Pending.is_terminal());
        assert!(BuyOrderStatus::Matched.is_terminal());
        assert!(BuyOrderStatus::Refunded.is_terminal());
    }

    #[test]
    fn test_bucket_roundtrip() {
        for bucket in [
            Bucket::Available,
            Bucket::Withdrawable,
            Bucket::Score,
            Bucket::ServiceFee,
        ] {
            assert_eq!(Bucket::from_id(bucket.id()), Some(bucket));
        }
        assert_eq!(Bucket::from_id(0), None);
    }

    #[test]
    fn test_account_total_assets_is_derived() {
        let mut account = Account::empty(7);
        account.available = Decimal::from_str("10.50").unwrap();
        account.withdrawable = Decimal::from_str("126.50").unwrap();
        account.score = Decimal::from_str("23.50").unwrap();
        account.service_fee = Decimal::from_str("3.00").unwrap();
        assert_eq!(account.total_assets(), Decimal::from_str("163.50").unwrap());
    }

    #[test]
    fn test_zone_contains_half_open() {
        let zone = Zone {
            zone_id: 1,
            floor: Decimal::from(1000),
            ceiling: Decimal::from(2000),
        };
        assert!(zone.contains(Decimal::from(1000)));
        assert!(zone.contains(Decimal::from_str("1999.99").unwrap()));
        assert!(!zone.contains(Decimal::from(2000)));
        assert!(!zone.contains(Decimal::from(999)));
    }

    #[test]
    fn test_ledger_entry_verify() {
        let entry = LedgerEntry {
            entry_id: 1,
            user_id: 1,
            bucket: Bucket::Available,
            delta: Decimal::from_str("-150.00").unwrap(),
            before: Decimal::from_str("200.00").unwrap(),
            after: Decimal::from_str("50.00").unwrap(),
            reason: LedgerReason::Purchase,
            biz_id: 9,
            memo: String::new(),
            flow_no: "f".into(),
            batch_no: "b".into(),
            created_at: Utc::now(),
        };
        assert!(entry.verify());

        let mut broken = entry.clone();
        broken.after = Decimal::from_str("49.00").unwrap();
        assert!(!broken.verify());
    }
}
