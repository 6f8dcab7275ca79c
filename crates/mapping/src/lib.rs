//! # Mapping Crate
//!
//! Translates between the canonical order vocabulary (`OrderType`, `OrderStatus`) and the
//! tokens a particular exchange speaks. Three layers take part, most specific first:
//!
//! 1. an `ExchangeOverride` hook registered for the exchange id,
//! 2. the caller's override `MappingTable` (usually from `[broker.mapping]`),
//! 3. the built-in `MappingTable`.

pub mod error;
pub mod hooks;
pub mod payload;
pub mod resolver;
pub mod table;

pub use error::MappingError;
pub use hooks::{BinanceOverride, ExchangeOverride, OrderContext, OverrideRegistry};
pub use resolver::MappingResolver;
pub use table::{MappingTable, RuleName, StatusRule};
