use crate::{Error, Result};

/// Host settings loaded from environment variables at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// JSON-lines file of `{ pair, bar, signal }` records to replay.
    pub bars_path: String,

    // Strategy config file path
    pub strategy_config_path: String,

    // Paper trading
    pub paper_slippage_bps: f64,

    /// Capacity of the bar, order and report channels.
    pub channel_capacity: usize,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Fails on a missing or malformed variable.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bars_path = lookup("BARS_PATH").ok_or_else(|| {
            Error::Config(
                "Required environment variable 'BARS_PATH' is not set. Check your .env file."
                    .into(),
            )
        })?;

        Ok(Config {
            bars_path,
            strategy_config_path: lookup("STRATEGY_CONFIG_PATH")
                .unwrap_or_else(|| "config/strategies.toml".to_string()),
            paper_slippage_bps: parse_optional(&lookup, "PAPER_SLIPPAGE_BPS")?.unwrap_or(0.0),
            channel_capacity: parse_optional(&lookup, "CHANNEL_CAPACITY")?.unwrap_or(256),
        })
    }
}

fn parse_optional<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let cfg = Config::from_lookup(lookup(&[("BARS_PATH", "bars.jsonl")])).unwrap();
        assert_eq!(cfg.bars_path, "bars.jsonl");
        assert_eq!(cfg.strategy_config_path, "config/strategies.toml");
        assert_eq!(cfg.paper_slippage_bps, 0.0);
        assert_eq!(cfg.channel_capacity, 256);
    }

    #[test]
    fn missing_bars_path_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_number_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("BARS_PATH", "bars.jsonl"),
            ("PAPER_SLIPPAGE_BPS", "ten"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("PAPER_SLIPPAGE_BPS"));
    }
}
