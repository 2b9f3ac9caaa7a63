pub mod context;
pub mod provider;
pub mod types;

pub use context::{fetch_market_context, MarketContext};
pub use provider::{DisabledMarketProvider, HttpJsonMarketProvider, MarketDataProvider};
