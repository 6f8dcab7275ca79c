use chrono::{DateTime, Utc};
use core_types::OrderSide;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Net exposure in one symbol built from the fills this broker observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// Signed: positive is long, negative is short.
    pub size: Decimal,
    /// Average entry price of the current size. `None` until a fill with a known price.
    pub price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    fn flat(symbol: &str) -> Self {
        Self { symbol: symbol.to_string(), size: Decimal::ZERO, price: None, updated_at: Utc::now() }
    }

    /// Applies a signed fill. Adding to the position re-averages the entry price, reducing it
    /// keeps the price, and crossing through flat opens at the fill price.
    fn update(&mut self, size: Decimal, price: Option<Decimal>) {
        let opened = self.size + size;

        let crossed = !opened.is_zero() && opened.is_sign_positive() != self.size.is_sign_positive();
        if self.size.is_zero() || crossed {
            self.price = price;
        } else if self.size.is_sign_positive() == size.is_sign_positive() {
            self.price = match (self.price, price) {
                (Some(held), Some(fill)) => Some((held * self.size + fill * size) / opened),
                (held, fill) => fill.or(held),
            };
        }

        self.size = opened;
        if self.size.is_zero() {
            self.price = None;
        }
        self.updated_at = Utc::now();
    }
}

/// Positions keyed by symbol. Flat positions are dropped.
#[derive(Debug, Clone, Default)]
pub struct PositionBook {
    positions: HashMap<String, Position>,
}

impl PositionBook {
    pub fn apply_fill(&mut self, symbol: &str, side: OrderSide, quantity: Decimal, price: Option<Decimal>) {
        let signed = match side {
            OrderSide::Buy => quantity,
            OrderSide::Sell => -quantity,
        };
        let position = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::flat(symbol));
        position.update(signed, price);

        tracing::debug!(symbol, size = %position.size, price = ?position.price, "position updated");
        if position.size.is_zero() {
            self.positions.remove(symbol);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }
}
