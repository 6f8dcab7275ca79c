//! # Feed Crate
//!
//! Turns repeated OHLCV fetches into a gap-free, duplicate-free stream of closed bars.
//! A feed either backfills from a start time and then follows the market, or, when
//! `historical` is set, stops once it reaches its end time.

pub mod candle_feed;
pub mod clock;
pub mod error;
pub mod heikin_ashi;


pub use candle_feed::{CandleFeed, FeedState, PollOutcome};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::FeedError;
pub use heikin_ashi::HeikinAshi;
