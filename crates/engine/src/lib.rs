pub mod executor;
pub mod live;
pub mod shutdown;

pub use executor::{BuyFill, RetryState, RetryStep, SellFill, SlippageLadder, TradeExecutor};
pub use live::{LiveLoop, LiveSummary, Step};
pub use shutdown::{Shutdown, ShutdownToken, ShutdownTrigger};
