//! Ledger - balance mutation and audit log
//!
//! Every bucket mutation goes through [`LedgerService`] and is paired with an
//! append-only [`LedgerEntry`] carrying a before/after snapshot and the
//! flow/batch correlation ids, so any settlement can be reconstructed from
//! logs alone.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::core_types::UserId;
use crate::error::{CoreError, Result};
use crate::models::{Account, Bucket, LedgerEntry, LedgerReason};
use crate::money::round2;
use crate::store::StoreTxn;

/// Correlation context shared by every leg of one money flow
#[derive(Debug, Clone)]
pub struct FlowCtx {
    pub reason: LedgerReason,
    /// Business record the flow belongs to (order id, consignment id, ...)
    pub biz_id: u64,
    pub flow_no: String,
    pub batch_no: String,
    pub memo: String,
}

impl FlowCtx {
    /// New flow under the given batch; the flow id is a fresh ULID
    pub fn new(reason: LedgerReason, biz_id: u64, batch_no: &str, memo: impl Into<String>) -> Self {
        Self {
            reason,
            biz_id,
            flow_no: ulid::Ulid::new().to_string(),
            batch_no: batch_no.to_string(),
            memo: memo.into(),
        }
    }

    /// Another leg of the same flow with a different reason/memo
    pub fn leg(&self, reason: LedgerReason, memo: impl Into<String>) -> Self {
        Self {
            reason,
            biz_id: self.biz_id,
            flow_no: self.flow_no.clone(),
            batch_no: self.batch_no.clone(),
            memo: memo.into(),
        }
    }
}

/// Atomic add/subtract on one account bucket, always paired with a log row
pub struct LedgerService;

impl LedgerService {
    /// Add `amount` (> 0) to one of the user's buckets
    pub async fn credit(
        txn: &mut dyn StoreTxn,
        user_id: UserId,
        bucket: Bucket,
        amount: Decimal,
        ctx: &FlowCtx,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        Self::post(txn, user_id, bucket, round2(amount), ctx, now).await
    }

    /// Subtract `amount` (> 0) from one of the user's buckets.
    ///
    /// # Errors
    /// `InsufficientBalance` when the bucket would go negative.
    pub async fn debit(
        txn: &mut dyn StoreTxn,
        user_id: UserId,
        bucket: Bucket,
        amount: Decimal,
        ctx: &FlowCtx,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        Self::post(txn, user_id, bucket, -round2(amount), ctx, now).await
    }

    async fn post(
        txn: &mut dyn StoreTxn,
        user_id: UserId,
        bucket: Bucket,
        delta: Decimal,
        ctx: &FlowCtx,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry> {
        if delta.is_zero() {
            return Err(CoreError::Invariant(format!(
                "zero-amount ledger post: user {} bucket {} reason {}",
                user_id, bucket, ctx.reason
            )));
        }

        let mut account = txn.account_for_update(user_id).await?;
        let before = account.bucket(bucket);
        let after = round2(before + delta);

        if after < Decimal::ZERO {
            return Err(CoreError::InsufficientBalance {
                user_id,
                bucket: bucket.as_str(),
                available: before,
                required: -delta,
            });
        }

        account.set_bucket(bucket, after);
        txn.update_account(&account).await?;

        let mut entry = LedgerEntry {
            entry_id: 0,
            user_id,
            bucket,
            delta,
            before,
            after,
            reason: ctx.reason,
            biz_id: ctx.biz_id,
            memo: ctx.memo.clone(),
            flow_no: ctx.flow_no.clone(),
            batch_no: ctx.batch_no.clone(),
            created_at: now,
        };
        entry.entry_id = txn.insert_ledger_entry(&entry).await?;

        tracing::debug!(
            user_id,
            bucket = bucket.as_str(),
            delta = %delta,
            after = %after,
            reason = ctx.reason.as_str(),
            flow_no = %ctx.flow_no,
            "ledger post"
        );

        Ok(entry)
    }

    /// Replay a user's entries from zero and cross-check the account row.
    ///
    /// Verifies `after == round2(before + delta)` for every entry, per-bucket
    /// continuity between consecutive entries, and that the replayed end
    /// state equals the stored account. Any mismatch is an invariant
    /// violation requiring manual reconciliation.
    pub fn audit(entries: &[LedgerEntry], account: &Account) -> Result<()> {
        let mut replayed = Account::empty(account.user_id);

        for entry in entries {
            if !entry.verify() {
                return Err(CoreError::Invariant(format!(
                    "ledger entry {}: after {} != before {} + delta {}",
                    entry.entry_id, entry.after, entry.before, entry.delta
                )));
            }
            let running = replayed.bucket(entry.bucket);
            if entry.before != running {
                return Err(CoreError::Invariant(format!(
                    "ledger entry {}: before {} breaks continuity (expected {})",
                    entry.entry_id, entry.before, running
                )));
            }
            replayed.set_bucket(entry.bucket, entry.after);
        }

        if replayed != *account {
            return Err(CoreError::Invariant(format!(
                "ledger replay for user {} does not match account row",
                account.user_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemStore, Store};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ctx(reason: LedgerReason) -> FlowCtx {
        FlowCtx::new(reason, 1, "batch-1", "test")
    }

    #[tokio::test]
    async fn test_credit_then_debit_snapshots() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        let now = Utc::now();

        let e1 = LedgerService::credit(
            txn.as_mut(),
            7,
            Bucket::Available,
            dec("200"),
            &ctx(LedgerReason::PoolRefund),
            now,
        )
        .await
        .unwrap();
        assert_eq!(e1.before, Decimal::ZERO);
        assert_eq!(e1.after, dec("200"));
        assert!(e1.verify());

        let e2 = LedgerService::debit(
            txn.as_mut(),
            7,
            Bucket::Available,
            dec("150.50"),
            &ctx(LedgerReason::Purchase),
            now,
        )
        .await
        .unwrap();
        assert_eq!(e2.before, dec("200"));
        assert_eq!(e2.delta, dec("-150.50"));
        assert_eq!(e2.after, dec("49.50"));
        assert!(e2.verify());

        txn.commit().await.unwrap();

        let account = store.account(7).await.unwrap().unwrap();
        assert_eq!(account.available, dec("49.50"));
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        let now = Utc::now();

        LedgerService::credit(
            txn.as_mut(),
            8,
            Bucket::Withdrawable,
            dec("10"),
            &ctx(LedgerReason::SellerPrincipal),
            now,
        )
        .await
        .unwrap();

        let err = LedgerService::debit(
            txn.as_mut(),
            8,
            Bucket::Withdrawable,
            dec("10.01"),
            &ctx(LedgerReason::Purchase),
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_zero_post_is_rejected() {
        let store = MemStore::new();
        let mut txn = store.begin().await.unwrap();
        let err = LedgerService::credit(
            txn.as_mut(),
            9,
            Bucket::Score,
            Decimal::ZERO,
            &ctx(LedgerReason::ProfitShare),
            Utc::now(),
        )
        .await
        .unwrap_err();
        assert!(err.is_invariant());
    }

    #[tokio::test]
    async fn test_audit_detects_tampering() {
        let store = MemStore::new();
        let now = Utc::now();
        let mut txn = store.begin().await.unwrap();
        LedgerService::credit(
            txn.as_mut(),
            5,
            Bucket::Available,
            dec("100"),
            &ctx(LedgerReason::PoolRefund),
            now,
        )
        .await
        .unwrap();
        LedgerService::debit(
            txn.as_mut(),
            5,
            Bucket::Available,
            dec("40"),
            &ctx(LedgerReason::Purchase),
            now,
        )
        .await
        .unwrap();
        txn.commit().await.unwrap();

        let entries = store.ledger_entries(5).await.unwrap();
        let account = store.account(5).await.unwrap().unwrap();
        assert!(LedgerService::audit(&entries, &account).is_ok());

        // A tampered account row must fail the replay
        let mut tampered = account.clone();
        tampered.available = dec("61");
        assert!(LedgerService::audit(&entries, &tampered).is_err());

        // A tampered entry must fail verification
        let mut broken = entries.clone();
        broken[1].after = dec("59");
        assert!(LedgerService::audit(&broken, &account).is_err());
    }
}
