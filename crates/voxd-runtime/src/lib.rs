#![deny(unsafe_code)]

//! Worker lifecycle and thermal protection — the two process-wide OS-level
//! concerns the pipeline builds on (§4.1, §4.2).

pub mod probe;
pub mod thermal;
pub mod worker;

pub use probe::{SimulatedProbe, SysfsTemperatureProbe};
pub use thermal::{ThermalController, ThermalState};
pub use worker::WorkerHandle;
