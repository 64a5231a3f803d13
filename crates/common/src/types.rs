use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One completed OHLC candle. Bars for a pair arrive with strictly
/// increasing `open_time` and never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// The extreme that hurts a position on `side` (low for Long, high for Short).
    pub fn adverse_extreme(&self, side: Side) -> f64 {
        match side {
            Side::Long => self.low,
            Side::Short => self.high,
        }
    }

    /// The extreme that helps a position on `side` (high for Long, low for Short).
    pub fn favorable_extreme(&self, side: Side) -> f64 {
        match side {
            Side::Long => self.high,
            Side::Short => self.low,
        }
    }
}

/// Direction of an open position or of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1 for Long, -1 for Short. Multiplies a price move into a signed PnL.
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Order side that opens (or adds to) a position on this side.
    pub fn entry_order_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position on this side.
    pub fn exit_order_side(self) -> OrderSide {
        self.entry_order_side().opposite()
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

/// Net exposure direction, including the flat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    #[default]
    Flat,
    Long,
    Short,
}

impl PositionSide {
    pub fn as_side(self) -> Option<Side> {
        match self {
            PositionSide::Flat => None,
            PositionSide::Long => Some(Side::Long),
            PositionSide::Short => Some(Side::Short),
        }
    }
}

impl From<Side> for PositionSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => PositionSide::Long,
            Side::Short => PositionSide::Short,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Flat => write!(f, "flat"),
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Side of a fill as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Position side a fill on this order side moves towards.
    pub fn as_side(self) -> Side {
        match self {
            OrderSide::Buy => Side::Long,
            OrderSide::Sell => Side::Short,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Directional decision produced by indicator logic for one finished bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    #[default]
    None,
    EnterLong,
    EnterShort,
    ExitLong,
    ExitShort,
}

impl Signal {
    /// Side this signal wants to enter, if it is an entry.
    pub fn entry_side(self) -> Option<Side> {
        match self {
            Signal::EnterLong => Some(Side::Long),
            Signal::EnterShort => Some(Side::Short),
            _ => None,
        }
    }

    /// True when this signal asks to leave a position on `side`.
    pub fn exits(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Signal::ExitLong, Side::Long) | (Signal::ExitShort, Side::Short)
        )
    }
}

/// What the engine wants the executor to do. Immutable once emitted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrderIntent {
    Open { side: Side, volume: f64 },
    /// Close `volume` of a position on `side`.
    Close { side: Side, volume: f64 },
    PartialClose { side: Side, volume: f64 },
    ModifyProtection {
        stop_price: Option<f64>,
        take_price: Option<f64>,
    },
}

impl OrderIntent {
    pub fn volume(&self) -> f64 {
        match self {
            OrderIntent::Open { volume, .. }
            | OrderIntent::Close { volume, .. }
            | OrderIntent::PartialClose { volume, .. } => *volume,
            OrderIntent::ModifyProtection { .. } => 0.0,
        }
    }

    /// Venue order side, or `None` for intents that do not trade.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            OrderIntent::Open { side, .. } => Some(side.entry_order_side()),
            OrderIntent::Close { side, .. } | OrderIntent::PartialClose { side, .. } => {
                Some(side.exit_order_side())
            }
            OrderIntent::ModifyProtection { .. } => None,
        }
    }

    pub fn is_entry(&self) -> bool {
        matches!(self, OrderIntent::Open { .. })
    }

    pub fn is_full_close(&self) -> bool {
        matches!(self, OrderIntent::Close { .. })
    }
}

/// Why an order was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderReason {
    SignalEntry,
    Reversal,
    StopLoss,
    TakeProfit,
    TrailingStop,
    Stage(usize),
    SignalExit,
    DrawdownBreaker,
    ProtectionUpdate,
}

impl std::fmt::Display for OrderReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderReason::SignalEntry => write!(f, "signal entry"),
            OrderReason::Reversal => write!(f, "reversal"),
            OrderReason::StopLoss => write!(f, "stop-loss"),
            OrderReason::TakeProfit => write!(f, "take-profit"),
            OrderReason::TrailingStop => write!(f, "trailing stop"),
            OrderReason::Stage(i) => write!(f, "stage {i} exit"),
            OrderReason::SignalExit => write!(f, "signal exit"),
            OrderReason::DrawdownBreaker => write!(f, "drawdown breaker"),
            OrderReason::ProtectionUpdate => write!(f, "protection update"),
        }
    }
}

/// An intent addressed to the executor for one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub pair: String,
    pub intent: OrderIntent,
    pub reason: OrderReason,
    /// Trigger level for protective exits; `None` = market.
    pub price: Option<f64>,
}

impl Order {
    pub fn new(pair: impl Into<String>, intent: OrderIntent, reason: OrderReason) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            pair: pair.into(),
            intent,
            reason,
            price: None,
        }
    }

    pub fn at_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }
}

/// Fill confirmation reported back by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub order_id: String,
    pub pair: String,
    pub side: OrderSide,
    pub filled_volume: f64,
    /// Zero when the venue did not report a price.
    pub fill_price: f64,
    /// Profit or loss realized by this fill (zero for pure adds).
    pub realized_pnl: f64,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of routing one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionReport {
    Filled(TradeEvent),
    /// Non-trading intent acknowledged (protection modify).
    Accepted { order_id: String },
    Failed { order_id: String, error: String },
}

impl ExecutionReport {
    pub fn order_id(&self) -> &str {
        match self {
            ExecutionReport::Filled(fill) => &fill.order_id,
            ExecutionReport::Accepted { order_id } | ExecutionReport::Failed { order_id, .. } => {
                order_id
            }
        }
    }
}

/// Current state of a position engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Running,
    /// A forced exit failed; no further intents are produced.
    Halted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Running => write!(f, "running"),
            EngineState::Halted => write!(f, "halted"),
        }
    }
}

/// Why an entry signal did not produce an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// Sizer volume normalized to zero.
    ZeroVolume,
    EntryInFlight,
    CloseInFlight,
    Halted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ZeroVolume => write!(f, "volume below minimum tradable size"),
            SkipReason::EntryInFlight => write!(f, "entry already in flight"),
            SkipReason::CloseInFlight => write!(f, "close still unconfirmed"),
            SkipReason::Halted => write!(f, "engine halted"),
        }
    }
}

/// Advisory diagnostics emitted alongside orders.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    EntrySkipped {
        pair: String,
        signal: Signal,
        reason: SkipReason,
    },
    ExitTriggered {
        pair: String,
        reason: OrderReason,
        price: f64,
    },
    StageFired {
        pair: String,
        stage: usize,
        volume: f64,
    },
    TrailingAdopted {
        pair: String,
        price: f64,
    },
    DrawdownBreached {
        pair: String,
        floating_loss: f64,
        limit: f64,
    },
    OrderFailed {
        pair: String,
        order_id: String,
        error: String,
    },
    /// Critical: the drawdown close could not be executed.
    ForcedExitFailed {
        pair: String,
        error: String,
    },
}
