use std::collections::HashMap;

use tracing::{debug, info};

use common::{Bar, Signal};

use crate::{BarHistory, SignalSource};

/// Holds one signal source per pair and the rolling bar history it reads.
pub struct SignalRegistry {
    sources: HashMap<String, Box<dyn SignalSource>>,
    histories: HashMap<String, BarHistory>,
    max_history: usize,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::with_history(BarHistory::DEFAULT_CAPACITY)
    }

    pub fn with_history(max_history: usize) -> Self {
        Self {
            sources: HashMap::new(),
            histories: HashMap::new(),
            max_history,
        }
    }

    /// Register `source` for `pair`, replacing any earlier one.
    pub fn register(&mut self, pair: impl Into<String>, source: Box<dyn SignalSource>) {
        let pair = pair.into();
        info!(pair = %pair, source = %source.name(), "Registered signal source");
        self.sources.insert(pair, source);
    }

    pub fn contains(&self, pair: &str) -> bool {
        self.sources.contains_key(pair)
    }

    pub fn history(&self, pair: &str) -> Option<&BarHistory> {
        self.histories.get(pair)
    }

    /// Record a closed bar and ask the pair's source for a signal.
    /// Pairs without a source always get `Signal::None`.
    pub fn on_bar(&mut self, pair: &str, bar: Bar) -> Signal {
        let history = self
            .histories
            .entry(pair.to_string())
            .or_insert_with(|| BarHistory::new(self.max_history));
        history.push(bar);

        match self.sources.get_mut(pair) {
            Some(source) => source.next_signal(history),
            None => {
                debug!(pair, "No signal source for pair");
                Signal::None
            }
        }
    }
}

impl Default for SignalRegistry {
    fn default() -> Self {
        Self::new()
    }
}
