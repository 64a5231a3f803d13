use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use common::{ExchangeClient, ExecutionReport, Order};

use crate::actor::ActorHandle;

/// Receives orders from the instrument actors, submits them to the exchange
/// and routes the outcome back to the actor that owns the pair.
///
/// This is the ONLY component that calls `ExchangeClient::submit_order`.
pub struct OrderExecutor {
    order_rx: mpsc::Receiver<Order>,
    client: Arc<dyn ExchangeClient>,
    routes: HashMap<String, ActorHandle>,
}

impl OrderExecutor {
    pub fn new(
        order_rx: mpsc::Receiver<Order>,
        client: Arc<dyn ExchangeClient>,
        handles: impl IntoIterator<Item = ActorHandle>,
    ) -> Self {
        let routes = handles
            .into_iter()
            .map(|h| (h.pair().to_string(), h))
            .collect();
        Self {
            order_rx,
            client,
            routes,
        }
    }

    /// Run the executor loop until every order sender is dropped.
    /// Call from `tokio::spawn`. Returns the number of orders routed.
    pub async fn run(mut self) -> usize {
        info!(pairs = self.routes.len(), "OrderExecutor running");
        let mut routed = 0;
        while let Some(order) = self.order_rx.recv().await {
            info!(pair = %order.pair, intent = ?order.intent, reason = %order.reason, "Executing order");

            let report = match self.client.submit_order(&order).await {
                Ok(Some(fill)) => {
                    info!(
                        pair = %fill.pair,
                        price = fill.fill_price,
                        qty = fill.filled_volume,
                        pnl = fill.realized_pnl,
                        "Order filled"
                    );
                    ExecutionReport::Filled(fill)
                }
                Ok(None) => ExecutionReport::Accepted {
                    order_id: order.id.clone(),
                },
                Err(e) => {
                    error!(pair = %order.pair, error = %e, "Order submission failed");
                    ExecutionReport::Failed {
                        order_id: order.id.clone(),
                        error: e.to_string(),
                    }
                }
            };
            routed += 1;

            match self.routes.get(&order.pair) {
                Some(handle) => handle.report(report).await,
                None => warn!(pair = %order.pair, "No actor registered for pair — report dropped"),
            }
        }
        warn!("OrderExecutor: order channel closed");
        routed
    }
}
