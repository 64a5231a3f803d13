pub mod config;
pub mod history;
pub mod registry;
pub mod replay;

pub use config::{StrategyConfig, StrategyFileConfig};
pub use history::BarHistory;
pub use registry::SignalRegistry;
pub use replay::{read_records, BarRecord, ReplaySource};

use common::Signal;

/// Anything that turns closed bars into trade signals.
///
/// The engine never asks how a signal was produced, so recorded decisions
/// and closures plug in the same way an indicator would.
pub trait SignalSource: Send {
    /// Human-readable name shown in logs.
    fn name(&self) -> &str;

    /// Signal for the newest bar in `history`. Called once per closed bar.
    fn next_signal(&mut self, history: &BarHistory) -> Signal;
}

/// Adapts a closure into a `SignalSource`.
pub struct FnSource<F> {
    name: String,
    f: F,
}

impl<F> FnSource<F>
where
    F: FnMut(&BarHistory) -> Signal + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> SignalSource for FnSource<F>
where
    F: FnMut(&BarHistory) -> Signal + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn next_signal(&mut self, history: &BarHistory) -> Signal {
        (self.f)(history)
    }
}
