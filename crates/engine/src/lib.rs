pub mod actor;
pub mod error;
pub mod executor;
pub mod machine;

pub use actor::{ActorHandle, ActorInput, InstrumentActor};
pub use error::EngineError;
pub use executor::OrderExecutor;
pub use machine::{PositionEngine, Step};
