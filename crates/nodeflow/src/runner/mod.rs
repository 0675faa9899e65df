//! Node evaluation: what each node kind does and how a unit steps through
//! its frames.

mod evaluator;
mod unit;

pub use evaluator::{Action, act, join_values};
pub use unit::{OutgoingSignal, SpawnRequest, UnitError, UnitStep, advance};
