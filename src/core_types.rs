//! Core types used throughout the system
//!
//! These are fundamental type aliases used by all modules.
//! They provide semantic meaning and enable future type evolution.

/// User ID - globally unique, immutable after assignment.
///
/// # Usage:
/// - Primary key for user accounts
/// - Used in HashMap for O(1) account lookup
pub type UserId = u64;

/// Trading session ID
pub type SessionId = u64;

/// Item (official listing) ID
pub type ItemId = u64;

/// Price zone ID
pub type ZoneId = u64;

/// Package (named item group within a session) ID
pub type PackageId = u64;

/// Buy order (pool entry) ID
pub type BuyOrderId = u64;

/// Settlement order ID
pub type OrderId = u64;

/// Consignment listing ID
pub type ConsignmentId = u64;

/// Holding (owned unit of an item) ID
pub type HoldingId = u64;

/// Ledger entry ID
pub type EntryId = u64;
