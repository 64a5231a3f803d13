pub mod config;
pub mod error;
pub mod exchange;
pub mod instrument;
pub mod position;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::ExchangeClient;
pub use instrument::InstrumentSpec;
pub use position::{FillOutcome, Position};
pub use types::*;
