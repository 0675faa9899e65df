use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use nodeflow_core_backend::{BackendResult, ProgramVersion};
use nodeflow_runner_state::{UnitEvent, UnitRecord};

use crate::MemoryState;

#[derive(Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    programs: Vec<ProgramVersion>,
    #[serde(default)]
    units: Vec<UnitRecord>,
    #[serde(default)]
    events: Vec<UnitEvent>,
}

pub(crate) fn load(path: &Path) -> BackendResult<MemoryState> {
    if !path.exists() {
        return Ok(MemoryState::default());
    }
    let bytes = fs::read(path)?;
    let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
    Ok(MemoryState {
        programs: snapshot
            .programs
            .into_iter()
            .map(|program| (program.id, program))
            .collect(),
        units: snapshot
            .units
            .into_iter()
            .filter(|unit| !crate::core_backend::is_collectable(unit))
            .map(|unit| (unit.unit_id, unit))
            .collect(),
        events: snapshot.events.into(),
        leases: Default::default(),
    })
}

/// Replace the snapshot file atomically via a sibling temporary file.
pub(crate) fn store(path: &Path, state: &MemoryState) -> BackendResult<()> {
    let snapshot = Snapshot {
        programs: state.programs.values().cloned().collect(),
        units: state.units.values().cloned().collect(),
        events: state.events.iter().cloned().collect(),
    };
    let bytes = serde_json::to_vec(&snapshot)?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
