pub mod types;
pub mod dictionary;
pub mod numbers;
pub mod lines;
pub mod fields;
pub mod parameters;
pub mod classify;
pub mod confidence;
pub mod orchestrator;

pub use types::*;
pub use dictionary::*;
pub use lines::*;
pub use fields::*;
pub use parameters::*;
pub use classify::*;
pub use confidence::*;
pub use orchestrator::*;

use thiserror::Error;

/// Input the structuring engine refuses to work on. No partial record is
/// produced for these.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StructuringError {
    #[error("No text fragments to structure")]
    EmptyInput,

    #[error("Fragment {index} is unusable: {reason}")]
    CorruptGeometry { index: usize, reason: String },

    #[error("Confidence threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f32),
}
