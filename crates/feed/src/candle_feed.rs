use crate::clock::{Clock, SystemClock};
use crate::error::FeedError;
use crate::heikin_ashi::HeikinAshi;
use api_client::OhlcvQuery;
use chrono::{DateTime, Duration, Utc};
use configuration::FeedConfig;
use core_types::Candle;
use gateway::{Gateway, GatewayError};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;

/// Where a feed is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// Catching up from the configured start.
    Backfill,
    /// Following the market as new bars close.
    Live,
    /// Historical-only feed that has reached its end. Buffered bars can still be read.
    Over,
}

/// Result of one [`CandleFeed::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// This many new bars were queued.
    Bars(usize),
    /// The exchange had nothing new.
    NoData,
    /// The fetch failed. The feed is unchanged and the next poll retries.
    Failed(GatewayError),
    /// A historical feed has nothing left to fetch.
    Finished,
}

/// Polls OHLCV bars for one symbol and timeframe, delivering each bar exactly once
/// in ascending time order.
pub struct CandleFeed {
    gateway: Arc<Gateway>,
    config: FeedConfig,
    clock: Arc<dyn Clock>,
    state: FeedState,
    /// Where the window opens when nothing has been delivered yet.
    window_start: DateTime<Utc>,
    /// Open time of the latest bar delivered.
    high_water_mark: Option<DateTime<Utc>>,
    buffer: VecDeque<Candle>,
    heikin_ashi: Option<HeikinAshi>,
}

impl CandleFeed {
    pub fn new(config: FeedConfig, gateway: Arc<Gateway>) -> Result<Self, FeedError> {
        Self::with_clock(config, gateway, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: FeedConfig,
        gateway: Arc<Gateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, FeedError> {
        let invalid = |reason: &str| FeedError::InvalidConfig {
            symbol: config.symbol.clone(),
            reason: reason.to_string(),
        };
        if config.ohlcv_limit == 0 {
            return Err(invalid("ohlcv_limit must be positive"));
        }
        if config.historical && config.start.is_none() {
            return Err(invalid("a historical feed needs a start time"));
        }
        let heikin_ashi = match &config.heikin_ashi {
            Some(ha) if ha.tick_size <= Decimal::ZERO => {
                return Err(invalid("heikin_ashi.tick_size must be positive"));
            }
            Some(ha) => Some(HeikinAshi::new(ha.tick_size, ha.price_digits)),
            None => None,
        };

        let (window_start, state) = match config.start {
            Some(start) => (start, FeedState::Backfill),
            None => (config.timeframe.current_period_start(clock.now()), FeedState::Live),
        };
        tracing::info!(
            symbol = %config.symbol,
            timeframe = %config.timeframe,
            start = %window_start,
            state = ?state,
            "feed created"
        );

        Ok(Self {
            gateway,
            config,
            clock,
            state,
            window_start,
            high_water_mark: None,
            buffer: VecDeque::new(),
            heikin_ashi,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.config.symbol
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    pub fn high_water_mark(&self) -> Option<DateTime<Utc>> {
        self.high_water_mark
    }

    /// Bars fetched but not yet read with [`next_bar`](Self::next_bar).
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Fetches the next page of bars after the high-water mark.
    pub async fn poll(&mut self) -> PollOutcome {
        if self.state == FeedState::Over {
            return PollOutcome::Finished;
        }

        let now = self.clock.now();
        let until = match self.config.end {
            Some(end) if self.config.historical => end.min(now),
            _ => now,
        };
        let since = self
            .high_water_mark
            .map(|hwm| hwm + Duration::milliseconds(1))
            .unwrap_or(self.window_start);

        if since >= until {
            return self.caught_up(0, now);
        }

        let query = OhlcvQuery {
            symbol: self.config.symbol.clone(),
            timeframe: self.config.timeframe,
            since: Some(since),
            limit: Some(self.config.ohlcv_limit),
            params: self.config.fetch_params.clone(),
        };
        let raw = match self.gateway.fetch_ohlcv(&query).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(symbol = %self.config.symbol, error = %err, "OHLCV fetch failed");
                return PollOutcome::Failed(err);
            }
        };
        let fetched = raw.len();

        let mut bars: Vec<Candle> = raw
            .into_iter()
            .filter(|bar| bar.timestamp >= since && bar.timestamp < until)
            .collect();
        bars.sort_by_key(|bar| bar.timestamp);
        bars.dedup_by_key(|bar| bar.timestamp);

        if self.config.drop_newest {
            let open_period = self.config.timeframe.current_period_start(now);
            if bars.last().is_some_and(|bar| bar.timestamp == open_period) {
                let dropped = bars.pop();
                tracing::debug!(symbol = %self.config.symbol, bar = ?dropped, "dropped incomplete bar");
            }
        }

        let count = bars.len();
        for bar in bars {
            let bar = match self.heikin_ashi.as_mut() {
                Some(ha) => ha.convert(&bar),
                None => bar,
            };
            if self.config.debug {
                tracing::debug!(symbol = %self.config.symbol, ?bar, "queued bar");
            }
            self.high_water_mark = Some(bar.timestamp);
            self.buffer.push_back(bar);
        }

        if self.state == FeedState::Backfill {
            let next_open = self
                .high_water_mark
                .map(|hwm| hwm + Duration::milliseconds(self.config.timeframe.duration_ms()));
            let exhausted = fetched < self.config.ohlcv_limit
                || count == 0
                || next_open.is_some_and(|next| next >= until);
            if exhausted {
                return self.caught_up(count, now);
            }
        }

        if count == 0 { PollOutcome::NoData } else { PollOutcome::Bars(count) }
    }

    /// The window reached `until`: historical feeds end, others go live.
    fn caught_up(&mut self, count: usize, now: DateTime<Utc>) -> PollOutcome {
        match self.state {
            FeedState::Backfill | FeedState::Live if self.config.historical => {
                tracing::info!(symbol = %self.config.symbol, "historical feed finished");
                self.state = FeedState::Over;
            }
            FeedState::Backfill => {
                tracing::info!(symbol = %self.config.symbol, at = %now, "backfill complete, feed is live");
                self.state = FeedState::Live;
            }
            _ => {}
        }

        match (count, self.state) {
            (0, FeedState::Over) => PollOutcome::Finished,
            (0, _) => PollOutcome::NoData,
            (n, _) => PollOutcome::Bars(n),
        }
    }

    /// Pops the oldest undelivered bar.
    pub fn next_bar(&mut self) -> Option<Candle> {
        self.buffer.pop_front()
    }
}
