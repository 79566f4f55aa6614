//! ep-core: shared vocabulary for energyplus runs.
//!
//! Contains:
//! - status (run lifecycle state machine)
//! - ids (validated simulation names used in archive paths)
//! - version (model/engine version extraction and mismatch policy)
//! - error (shared error types)

pub mod error;
pub mod ids;
pub mod status;
pub mod version;

pub use error::{CoreError, CoreResult};
pub use ids::SimulationName;
pub use status::RunStatus;
pub use version::{
    VersionMismatchAction, check_version_compat, engine_version_from_output, idd_version,
    model_version,
};
