use chrono::{DateTime, Utc};
use mapping::payload::as_decimal;
use rust_decimal::Decimal;
use serde_json::Value;

/// Cash and total value of the account currency at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub currency: String,
    /// Free balance.
    pub cash: Decimal,
    /// Total balance, locked funds included.
    pub value: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl BalanceSnapshot {
    /// Reads `free.<currency>` and `total.<currency>` from a unified balance payload.
    /// A currency the account has never held reads as zero.
    pub fn from_payload(currency: &str, payload: &Value) -> Self {
        let read = |section: &str| {
            payload
                .get(section)
                .and_then(|balances| balances.get(currency))
                .and_then(as_decimal)
                .unwrap_or(Decimal::ZERO)
        };

        Self {
            currency: currency.to_string(),
            cash: read("free"),
            value: read("total"),
            fetched_at: Utc::now(),
        }
    }
}

/// The last fetched balance. Reads never touch the network.
#[derive(Debug, Clone, Default)]
pub struct BalanceCache {
    snapshot: Option<BalanceSnapshot>,
}

impl BalanceCache {
    pub fn replace(&mut self, snapshot: BalanceSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<&BalanceSnapshot> {
        self.snapshot.as_ref()
    }

    /// Zero until the first refresh.
    pub fn cash(&self) -> Decimal {
        self.snapshot.as_ref().map_or(Decimal::ZERO, |s| s.cash)
    }

    /// Zero until the first refresh.
    pub fn value(&self) -> Decimal {
        self.snapshot.as_ref().map_or(Decimal::ZERO, |s| s.value)
    }
}
