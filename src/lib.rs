//! matchpool - Pool matching and settlement engine
//!
//! Batch-driven matching for session-based collectible trading: weighted
//! winner selection under scarcity, per-trade settlement across per-user
//! account buckets, consignment lifecycle, and referral commissions.
//!
//! # Modules
//!
//! - [`core_types`] - Core type definitions (UserId, ItemId, etc.)
//! - [`models`] - Domain entities and status codes
//! - [`money`] - 2-decimal money arithmetic
//! - [`config`] - App config and per-run rule snapshots
//! - [`clock`] - Injected time source
//! - [`store`] - Storage traits + PostgreSQL / in-memory implementations
//! - [`ledger`] - Bucket mutations paired with audit entries
//! - [`selector`] - Weighted winner selection
//! - [`market`] - Session gate and price-zone resolution
//! - [`appreciation`] - Post-trade price step-up rule
//! - [`consignment`] - Consignment state machine
//! - [`assets`] - Pool entry, delivery, consignment orchestration
//! - [`settlement`] - Seller payout split and commission cascade
//! - [`executor`] - Per-order trade transaction
//! - [`matcher`] - The batch entry point

// Core types - must be first!
pub mod core_types;

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod money;

pub mod store;

pub mod appreciation;
pub mod assets;
pub mod collaborators;
pub mod consignment;
pub mod executor;
pub mod ledger;
pub mod market;
pub mod matcher;
pub mod selector;
pub mod settlement;

// Convenient re-exports at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, TieBreak, TradeRules};
pub use error::{CoreError, Result};
pub use matcher::{MatchOutcome, PoolMatcher};
pub use models::{
    Account, Bucket, BuyOrder, BuyOrderStatus, ConsignmentListing, ConsignmentStatus, Holding,
    HoldingConsignStatus, Item, ItemStatus, LedgerEntry, LedgerReason, Order, OrderStatus,
    Session, SessionStatus, Zone,
};
pub use selector::{Candidate, Selector};
pub use store::{MemStore, PgStore, Store, StoreTxn};
