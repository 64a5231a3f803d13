use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{error, info, warn};

use common::{Bar, EngineEvent, EngineState, ExecutionReport, Order, Signal};

use crate::machine::{PositionEngine, Step};

/// Inputs serialized into one instrument's engine.
#[derive(Debug)]
pub enum ActorInput {
    Bar { bar: Bar, signal: Signal },
    Report(ExecutionReport),
    /// Answered once no trading order is awaiting a report.
    Settle(oneshot::Sender<()>),
    Shutdown,
}

/// Cloneable handle to a running instrument actor.
#[derive(Clone)]
pub struct ActorHandle {
    pair: String,
    input_tx: mpsc::Sender<ActorInput>,
    state: Arc<RwLock<EngineState>>,
}

impl ActorHandle {
    pub fn pair(&self) -> &str {
        &self.pair
    }

    pub async fn send_bar(&self, bar: Bar, signal: Signal) {
        self.send(ActorInput::Bar { bar, signal }).await;
    }

    pub async fn report(&self, report: ExecutionReport) {
        self.send(ActorInput::Report(report)).await;
    }

    /// Wait until every trading order emitted so far has been filled or
    /// failed. Only resolves if the executor keeps reporting.
    pub async fn settle(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(ActorInput::Settle(tx)).await;
        let _ = rx.await;
    }

    pub async fn shutdown(&self) {
        self.send(ActorInput::Shutdown).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    async fn send(&self, input: ActorInput) {
        if self.input_tx.send(input).await.is_err() {
            warn!(pair = %self.pair, "Instrument actor is gone, input dropped");
        }
    }
}

/// Single writer for one instrument: owns the `PositionEngine` and applies
/// bars and execution reports strictly in arrival order.
pub struct InstrumentActor {
    engine: PositionEngine,
    input_rx: mpsc::Receiver<ActorInput>,
    order_tx: mpsc::Sender<Order>,
    event_tx: mpsc::Sender<EngineEvent>,
    state: Arc<RwLock<EngineState>>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl InstrumentActor {
    pub fn new(
        engine: PositionEngine,
        order_tx: mpsc::Sender<Order>,
        event_tx: mpsc::Sender<EngineEvent>,
        capacity: usize,
    ) -> (Self, ActorHandle) {
        let (input_tx, input_rx) = mpsc::channel(capacity.max(1));
        let state = Arc::new(RwLock::new(engine.state()));

        let handle = ActorHandle {
            pair: engine.pair().to_string(),
            input_tx,
            state: state.clone(),
        };

        let actor = InstrumentActor {
            engine,
            input_rx,
            order_tx,
            event_tx,
            state,
            waiters: Vec::new(),
        };

        (actor, handle)
    }

    /// Run until `Shutdown` or until every handle is dropped, then hand the
    /// engine back for inspection. Call from `tokio::spawn`.
    pub async fn run(mut self) -> PositionEngine {
        info!(pair = %self.engine.pair(), "Instrument actor running");

        while let Some(input) = self.input_rx.recv().await {
            match input {
                ActorInput::Bar { bar, signal } => {
                    let step = self.engine.on_bar(&bar, signal);
                    self.publish(step).await;
                }
                ActorInput::Report(report) => match self.engine.on_report(report) {
                    Ok(step) => self.publish(step).await,
                    Err(e) => {
                        error!(pair = %self.engine.pair(), error = %e, "Critical engine failure");
                        *self.state.write().await = self.engine.state();
                        let _ = self
                            .event_tx
                            .send(EngineEvent::ForcedExitFailed {
                                pair: self.engine.pair().to_string(),
                                error: e.to_string(),
                            })
                            .await;
                    }
                },
                ActorInput::Settle(tx) => self.waiters.push(tx),
                ActorInput::Shutdown => {
                    info!(pair = %self.engine.pair(), "Instrument actor shutting down");
                    break;
                }
            }

            if self.engine.pending_orders() == 0 {
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(());
                }
            }
        }

        self.engine
    }

    async fn publish(&self, step: Step) {
        for order in step.orders {
            if self.order_tx.send(order).await.is_err() {
                warn!(pair = %self.engine.pair(), "Order channel closed, order dropped");
            }
        }
        for event in step.events {
            let _ = self.event_tx.send(event).await;
        }
    }
}
