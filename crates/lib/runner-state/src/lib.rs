//! Persisted execution state: program state threaded between units, unit
//! records with their continuation frames, events, signals and the root's
//! message ledger.

mod event;
mod ledger;
mod signal;
mod state;
mod unit;

pub use self::event::{UnitEvent, UnitEventKind};
pub use self::ledger::{LedgerEntry, MessageLedger};
pub use self::signal::{InputResponse, MessagePayload, MessageSignal, Signal};
pub use self::state::{ProgramState, VariableState};
pub use self::unit::{UnitFrame, UnitRecord, UnitStatus};
