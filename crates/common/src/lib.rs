pub mod config;
pub mod error;
pub mod exchange;
pub mod store;
pub mod types;

pub use config::{Config, NATIVE_SOL_MINT};
pub use error::{Error, Result};
pub use exchange::{BalanceSource, Venue};
pub use store::{CandleSource, PositionStore};
pub use types::*;
