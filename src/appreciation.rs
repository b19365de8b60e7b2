//! Appreciation service
//!
//! Decides whether a traded item's reference price steps up after a sale.
//! The rule keys off the recency of the item's previous trade: a first trade,
//! or a previous trade on the calendar day exactly one day before now,
//! triggers a step-up of `appreciation_rate`.

use chrono::Days;
use rust_decimal::Decimal;

use crate::clock::Clock;
use crate::config::TradeRules;
use crate::core_types::OrderId;
use crate::error::Result;
use crate::models::{AppreciationEvent, Item};
use crate::money::round2;
use crate::store::StoreTxn;

pub struct AppreciationService<'a> {
    rules: &'a TradeRules,
    clock: &'a dyn Clock,
}

impl<'a> AppreciationService<'a> {
    pub fn new(rules: &'a TradeRules, clock: &'a dyn Clock) -> Self {
        Self { rules, clock }
    }

    /// Apply the appreciation rule to `item` after a completed trade.
    ///
    /// `current_order` is excluded from the previous-trade lookup. On a
    /// step-up the item's price is raised in place and an audit row is
    /// written; the caller persists the item (it re-zones first).
    pub async fn check_and_appreciate(
        &self,
        txn: &mut dyn StoreTxn,
        item: &mut Item,
        current_order: OrderId,
    ) -> Result<Option<AppreciationEvent>> {
        let now = self.clock.now();
        let previous = txn.last_trade_at(item.item_id, current_order).await?;

        let reason = match previous {
            None => "first_trade",
            Some(prev) => {
                let yesterday = now
                    .date_naive()
                    .checked_sub_days(Days::new(1))
                    .unwrap_or_else(|| now.date_naive());
                if prev.date_naive() == yesterday {
                    "traded_yesterday"
                } else {
                    return Ok(None);
                }
            }
        };

        let old_price = item.price;
        let new_price = round2(old_price * (Decimal::ONE + self.rules.appreciation_rate));
        if new_price <= old_price {
            // Zero rate (or rounding) produced no step-up
            return Ok(None);
        }

        item.price = new_price;
        let event = AppreciationEvent {
            item_id: item.item_id,
            old_price,
            new_price,
            rate: self.rules.appreciation_rate,
            reason,
            created_at: now,
        };
        txn.insert_appreciation(&event).await?;

        tracing::info!(
            item_id = item.item_id,
            old_price = %old_price,
            new_price = %new_price,
            rate = %self.rules.appreciation_rate,
            reason,
            "item appreciated"
        );

        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::ItemStatus;
    use crate::store::{MemStore, Store};
    use chrono::{Duration, TimeZone, Utc};
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn item(price: &str) -> Item {
        Item {
            item_id: 1,
            session_id: 1,
            zone_id: 1,
            package_id: 0,
            title: "piece".into(),
            price: dec(price),
            stock: 10,
            sales: 0,
            status: ItemStatus::Active,
        }
    }

    fn clock_at(y: i32, m: u32, d: u32, h: u32) -> ManualClock {
        ManualClock::new(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_first_trade_appreciates() {
        let store = MemStore::new();
        let rules = TradeRules::default();
        let clock = clock_at(2025, 6, 10, 12);
        let service = AppreciationService::new(&rules, &clock);

        let mut item = item("100");
        let mut txn = store.begin().await.unwrap();
        let event = service
            .check_and_appreciate(txn.as_mut(), &mut item, 99)
            .await
            .unwrap()
            .expect("first trade should appreciate");
        assert_eq!(event.reason, "first_trade");
        assert_eq!(item.price, dec("105.00"));
    }

    #[tokio::test]
    async fn test_yesterday_trade_appreciates() {
        let store = MemStore::new();
        let rules = TradeRules::default();
        let clock = clock_at(2025, 6, 10, 1);
        let service = AppreciationService::new(&rules, &clock);

        store
            .seed_trade_time(1, Utc.with_ymd_and_hms(2025, 6, 9, 23, 30, 0).unwrap())
            .await;

        let mut item = item("88.40");
        let mut txn = store.begin().await.unwrap();
        let event = service
            .check_and_appreciate(txn.as_mut(), &mut item, 99)
            .await
            .unwrap()
            .expect("yesterday's trade should appreciate");
        assert_eq!(event.reason, "traded_yesterday");
        // 88.40 * 1.05 = 92.82
        assert_eq!(item.price, dec("92.82"));
    }

    #[tokio::test]
    async fn test_older_trade_does_not_appreciate() {
        let store = MemStore::new();
        let rules = TradeRules::default();
        let clock = clock_at(2025, 6, 10, 12);
        let service = AppreciationService::new(&rules, &clock);

        store
            .seed_trade_time(1, Utc.with_ymd_and_hms(2025, 6, 7, 12, 0, 0).unwrap())
            .await;

        let mut item = item("100");
        let mut txn = store.begin().await.unwrap();
        let event = service
            .check_and_appreciate(txn.as_mut(), &mut item, 99)
            .await
            .unwrap();
        assert!(event.is_none());
        assert_eq!(item.price, dec("100"));
    }

    #[tokio::test]
    async fn test_same_day_trade_does_not_appreciate() {
        let store = MemStore::new();
        let rules = TradeRules::default();
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        let clock = ManualClock::new(now);
        let service = AppreciationService::new(&rules, &clock);

        store.seed_trade_time(1, now - Duration::hours(2)).await;

        let mut item = item("100");
        let mut txn = store.begin().await.unwrap();
        assert!(
            service
                .check_and_appreciate(txn.as_mut(), &mut item, 99)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_zero_rate_is_a_no_op() {
        let store = MemStore::new();
        let mut rules = TradeRules::default();
        rules.appreciation_rate = Decimal::ZERO;
        let clock = clock_at(2025, 6, 10, 12);
        let service = AppreciationService::new(&rules, &clock);

        let mut item = item("100");
        let mut txn = store.begin().await.unwrap();
        assert!(
            service
                .check_and_appreciate(txn.as_mut(), &mut item, 99)
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(item.price, dec("100"));
    }
}
