use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{Error, ExchangeClient, Order, OrderSide, Position, Result, TradeEvent};

/// Per-pair book kept by the paper venue.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaperAccount {
    pub position: Position,
    pub realized_pnl: f64,
    pub fills: u64,
}

/// Simulated exchange client.
///
/// Protective exits fill at their trigger level, everything else at the
/// latest price pushed through `update_price`. Slippage is applied against
/// the trader on every fill. Realized PnL comes from the client's own
/// position ledger, so the engine's equity follows what this venue booked.
pub struct PaperClient {
    /// Latest known price per pair, updated via `update_price`.
    prices: Arc<RwLock<HashMap<String, f64>>>,
    accounts: Arc<RwLock<HashMap<String, PaperAccount>>>,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperClient initialized");
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
            accounts: Arc::new(RwLock::new(HashMap::new())),
            slippage_bps,
        }
    }

    /// Update the latest price for a pair (called once per replayed bar).
    pub async fn update_price(&self, pair: &str, price: f64) {
        self.prices.write().await.insert(pair.to_string(), price);
    }

    pub async fn account(&self, pair: &str) -> PaperAccount {
        self.accounts
            .read()
            .await
            .get(pair)
            .copied()
            .unwrap_or_default()
    }

    /// Buys pay more, sells receive less.
    fn slipped(&self, price: f64, side: OrderSide) -> f64 {
        let slip = self.slippage_bps / 10_000.0;
        match side {
            OrderSide::Buy => price * (1.0 + slip),
            OrderSide::Sell => price * (1.0 - slip),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperClient {
    async fn submit_order(&self, order: &Order) -> Result<Option<TradeEvent>> {
        let Some(side) = order.intent.order_side() else {
            debug!(pair = %order.pair, intent = ?order.intent, "Paper venue acknowledged protection update");
            return Ok(None);
        };

        let volume = order.intent.volume();
        if !(volume > 0.0) {
            return Err(Error::Execution(format!(
                "refusing {} order with volume {volume}",
                order.reason
            )));
        }

        let reference = match order.price {
            Some(trigger) => trigger,
            None => self.current_price(&order.pair).await?,
        };
        let fill_price = self.slipped(reference, side);

        let mut accounts = self.accounts.write().await;
        let account = accounts.entry(order.pair.clone()).or_default();
        let outcome = account.position.apply_fill(side, volume, fill_price);
        account.realized_pnl += outcome.realized_pnl;
        account.fills += 1;

        debug!(
            pair = %order.pair,
            side = %side,
            reference,
            fill = fill_price,
            qty = volume,
            pnl = outcome.realized_pnl,
            "Paper fill simulated"
        );

        Ok(Some(TradeEvent {
            order_id: order.id.clone(),
            pair: order.pair.clone(),
            side,
            filled_volume: volume,
            fill_price,
            realized_pnl: outcome.realized_pnl,
            timestamp: Utc::now(),
        }))
    }

    async fn current_price(&self, pair: &str) -> Result<f64> {
        self.prices
            .read()
            .await
            .get(pair)
            .copied()
            .ok_or_else(|| Error::Execution(format!("PaperClient has no price for pair '{pair}'")))
    }
}
