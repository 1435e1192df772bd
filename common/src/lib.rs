pub mod data;
pub mod results;
pub mod simulation;
pub mod task;
pub mod wire;

pub use data::{DataError, Domain, MonitorData, SimulationResult};
pub use results::{artifact_path, DEFAULT_DATA_DIR, DEFAULT_DATA_PATH, RESULT_EXTENSION};
pub use simulation::{
    Direction, GaussianPulse, Monitor, Polarization, Simulation, Source, SourceKind, Structure,
    ValidationError,
};
pub use task::{RunInfo, TaskId, TaskInfo, TaskName, TaskStatus};
pub use wire::{ErrorBody, TaskCreateRequest, TaskCreateResponse};
