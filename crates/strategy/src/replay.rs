use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use common::{Bar, Error, Result, Signal};

use crate::{BarHistory, SignalSource};

/// One line of a replay file.
///
/// ```json
/// {"pair":"BTCUSDT","bar":{"open_time":"2024-01-01T00:00:00Z","open":100.0,"high":101.0,"low":99.5,"close":100.5},"signal":"enter_long"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub pair: String,
    pub bar: Bar,
    #[serde(default)]
    pub signal: Signal,
}

/// Parse JSON-lines records. Blank lines and `#` comments are skipped.
pub fn parse_records(reader: impl BufRead) -> Result<Vec<BarRecord>> {
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let record: BarRecord = serde_json::from_str(trimmed)
            .map_err(|e| Error::Other(format!("line {}: {e}", idx + 1)))?;
        records.push(record);
    }
    Ok(records)
}

pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<BarRecord>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)?;
    let records = parse_records(std::io::BufReader::new(file))?;
    info!(path = %path.display(), records = records.len(), "Loaded bar records");
    Ok(records)
}

/// Replays signals recorded against bar open times.
pub struct ReplaySource {
    name: String,
    signals: HashMap<DateTime<Utc>, Signal>,
}

impl ReplaySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signals: HashMap::new(),
        }
    }

    /// Collect the non-empty signals recorded for `pair`.
    pub fn from_records<'a>(
        pair: &str,
        records: impl IntoIterator<Item = &'a BarRecord>,
    ) -> Self {
        let mut source = Self::new(format!("replay:{pair}"));
        for record in records.into_iter().filter(|r| r.pair == pair) {
            source.record(record.bar.open_time, record.signal);
        }
        source
    }

    pub fn record(&mut self, open_time: DateTime<Utc>, signal: Signal) {
        if signal != Signal::None {
            self.signals.insert(open_time, signal);
        }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl SignalSource for ReplaySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_signal(&mut self, history: &BarHistory) -> Signal {
        let Some(bar) = history.latest() else {
            return Signal::None;
        };
        let signal = self.signals.get(&bar.open_time).copied().unwrap_or_default();
        if signal != Signal::None {
            debug!(source = %self.name, open_time = %bar.open_time, ?signal, "Replayed signal");
        }
        signal
    }
}
