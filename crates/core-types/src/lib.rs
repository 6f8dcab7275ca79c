pub mod enums;
pub mod error;
pub mod structs;
pub mod timeframe;

// Re-export the core types to provide a clean public API.
pub use enums::{OrderSide, OrderStatus, OrderType};
pub use error::CoreError;
pub use structs::{Candle, OrderRequest, Params};
pub use timeframe::Timeframe;
