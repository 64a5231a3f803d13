//! Protective levels and money management for a single position engine.

pub mod config;
pub mod protection;
pub mod sizing;

pub use config::{validate_instrument, ConfigError, ExitStage, ResetPolicy, ReversalMode, RiskConfig};
pub use protection::{ProtectionState, ProtectiveExit, StageExit, StageFlags, PRICE_EPSILON};
pub use sizing::{Sizer, SizingState};
