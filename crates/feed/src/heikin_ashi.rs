use core_types::Candle;
use rust_decimal::Decimal;

/// Converts regular candles into Heikin-Ashi candles.
///
/// ```text
/// HA close = (open + high + low + close) / 4
/// HA open  = (previous HA open + previous HA close) / 2, or the raw open for the first bar
/// HA high  = max(high, HA open, HA close)
/// HA low   = min(low, HA open, HA close)
/// ```
///
/// Prices are snapped to the tick size on output; the unrounded values are carried to the
/// next bar, across polls.
#[derive(Debug, Clone)]
pub struct HeikinAshi {
    tick_size: Decimal,
    price_digits: u32,
    previous: Option<(Decimal, Decimal)>,
}

impl HeikinAshi {
    pub fn new(tick_size: Decimal, price_digits: u32) -> Self {
        Self { tick_size, price_digits, previous: None }
    }

    pub fn convert(&mut self, candle: &Candle) -> Candle {
        let close = (candle.open + candle.high + candle.low + candle.close) / Decimal::from(4);
        let open = match self.previous {
            Some((prev_open, prev_close)) => (prev_open + prev_close) / Decimal::TWO,
            None => candle.open,
        };
        let high = candle.high.max(open).max(close);
        let low = candle.low.min(open).min(close);
        self.previous = Some((open, close));

        Candle {
            timestamp: candle.timestamp,
            open: self.round(open),
            high: self.round(high),
            low: self.round(low),
            close: self.round(close),
            volume: candle.volume,
        }
    }

    fn round(&self, price: Decimal) -> Decimal {
        ((price / self.tick_size).round() * self.tick_size).round_dp(self.price_digits)
    }
}
