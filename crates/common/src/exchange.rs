use async_trait::async_trait;

use crate::{Order, Result, TradeEvent};

/// Abstraction over the venue that turns intents into orders.
///
/// `PaperClient` implements this for simulation. Only the order executor in
/// `crates/engine` holds a `dyn ExchangeClient`; every order reaching it was
/// produced by a position engine.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Route one order. Returns the fill for trading intents and `None` for
    /// intents that are only acknowledged (protection modifies).
    async fn submit_order(&self, order: &Order) -> Result<Option<TradeEvent>>;

    /// Get the latest price for a trading pair.
    async fn current_price(&self, pair: &str) -> Result<f64>;
}
