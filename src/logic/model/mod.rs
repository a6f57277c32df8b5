//! Model Stack
//!
//! The versioned, immutable model triple: feature transform, priority
//! classifier and outlier scorer, plus artifact persistence and the
//! training job that produces new generations.

pub mod bayes;
pub mod features;
pub mod outlier;
pub mod snapshot;
pub mod train;

pub use snapshot::{
    load_artifacts, read_drift_state, save_artifacts, write_drift_state, ArtifactError,
    DriftState, ModelSnapshot, ScoreResult,
};
pub use train::{train, TrainError, TrainInput, TrainOutcome, TrainReport};
