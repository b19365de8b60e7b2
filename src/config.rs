use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::str::FromStr;

use crate::money::clamp_rate;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    /// PostgreSQL connection URL for accounts, listings and the ledger
    #[serde(default)]
    pub postgres_url: Option<String>,
    /// Rule overrides mirroring the external key/value store
    /// (see [`TradeRules::from_kv`] for the recognized keys)
    #[serde(default)]
    pub rules: HashMap<String, String>,
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}

/// Winner-selection tie-break mode when all weights are equal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// Earliest-created candidates win (deterministic)
    Time,
    /// Uniform draw without replacement
    Random,
}

impl TieBreak {
    pub fn as_str(&self) -> &'static str {
        match self {
            TieBreak::Time => "time",
            TieBreak::Random => "random",
        }
    }
}

impl FromStr for TieBreak {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(TieBreak::Time),
            "random" => Ok(TieBreak::Random),
            _ => Err(()),
        }
    }
}

/// Default referral commission rates by inviter level (L1, L2, L3)
static DEFAULT_COMMISSION_RATES: Lazy<Vec<Decimal>> = Lazy::new(|| {
    vec![
        Decimal::from_str("0.05").unwrap(),
        Decimal::from_str("0.03").unwrap(),
        Decimal::from_str("0.01").unwrap(),
    ]
});

/// Maximum referral levels walked by the commission cascade
pub const MAX_COMMISSION_LEVELS: usize = 3;

/// Rule snapshot for one batch run
///
/// Resolved once from the external key/value store before matching starts, so
/// a run stays internally consistent even if configuration changes mid-batch.
/// Missing or unparsable values fall back to the documented defaults;
/// out-of-range rates are clamped into `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRules {
    /// Share of resale profit paid out as withdrawable balance
    pub profit_split: Decimal,
    /// Withdrawable share of the principal for legacy-asset settlements
    pub legacy_principal_split: Decimal,
    /// Referral commission rates, one per inviter level
    pub commission_rates: Vec<Decimal>,
    /// Price step-up applied on appreciation
    pub appreciation_rate: Decimal,
    /// Hours a holding stays locked after acquisition before it can be consigned
    pub consign_unlock_hours: i64,
    /// Service fee charged on consignment creation
    pub service_fee_rate: Decimal,
    /// Tie-break mode for equal-weight selection
    pub tie_break: TieBreak,
    /// Width of a price zone bracket
    pub zone_width: Decimal,
}

impl Default for TradeRules {
    fn default() -> Self {
        Self {
            profit_split: Decimal::from_str("0.5").unwrap(),
            legacy_principal_split: Decimal::from_str("0.5").unwrap(),
            commission_rates: DEFAULT_COMMISSION_RATES.clone(),
            appreciation_rate: Decimal::from_str("0.05").unwrap(),
            consign_unlock_hours: 24,
            service_fee_rate: Decimal::from_str("0.03").unwrap(),
            tie_break: TieBreak::Time,
            zone_width: Decimal::from(1000),
        }
    }
}

impl TradeRules {
    /// Build a snapshot from the external key/value store's string map.
    ///
    /// Recognized keys:
    /// `profit.split`, `legacy.principal.split`, `commission.rate.1..=3`,
    /// `appreciation.rate`, `consign.unlock.hours`, `service.fee.rate`,
    /// `match.tie.break`, `zone.width`
    pub fn from_kv(kv: &HashMap<String, String>) -> Self {
        let defaults = TradeRules::default();

        let rate = |key: &str, fallback: Decimal| -> Decimal {
            match kv.get(key).map(|v| Decimal::from_str(v)) {
                Some(Ok(v)) => clamp_rate(key, v),
                Some(Err(_)) => {
                    tracing::warn!(key, value = %kv[key], "unparsable rate, using default");
                    fallback
                }
                None => fallback,
            }
        };

        let commission_rates = (1..=MAX_COMMISSION_LEVELS)
            .map(|level| {
                rate(
                    &format!("commission.rate.{}", level),
                    defaults.commission_rates[level - 1],
                )
            })
            .collect();

        let consign_unlock_hours = match kv.get("consign.unlock.hours").map(|v| v.parse::<i64>()) {
            Some(Ok(h)) if h >= 0 => h,
            Some(_) => {
                tracing::warn!(value = %kv["consign.unlock.hours"], "invalid unlock hours, using default");
                defaults.consign_unlock_hours
            }
            None => defaults.consign_unlock_hours,
        };

        let tie_break = match kv.get("match.tie.break").map(|v| v.parse::<TieBreak>()) {
            Some(Ok(mode)) => mode,
            Some(Err(_)) => {
                tracing::warn!(value = %kv["match.tie.break"], "unknown tie-break mode, using time");
                defaults.tie_break
            }
            None => defaults.tie_break,
        };

        let zone_width = match kv.get("zone.width").map(|v| Decimal::from_str(v)) {
            Some(Ok(w)) if w > Decimal::ZERO => w,
            Some(_) => {
                tracing::warn!(value = %kv["zone.width"], "invalid zone width, using default");
                defaults.zone_width
            }
            None => defaults.zone_width,
        };

        Self {
            profit_split: rate("profit.split", defaults.profit_split),
            legacy_principal_split: rate(
                "legacy.principal.split",
                defaults.legacy_principal_split,
            ),
            commission_rates,
            appreciation_rate: rate("appreciation.rate", defaults.appreciation_rate),
            consign_unlock_hours,
            service_fee_rate: rate("service.fee.rate", defaults.service_fee_rate),
            tie_break,
            zone_width,
        }
    }

    /// Commission rate for a 1-based inviter level; zero beyond the table
    pub fn commission_rate(&self, level: usize) -> Decimal {
        self.commission_rates
            .get(level - 1)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// True when every configured commission level is zero
    pub fn commissions_disabled(&self) -> bool {
        self.commission_rates.iter().all(|r| r.is_zero())
    }
}
