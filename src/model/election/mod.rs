mod election_core;
pub mod lifecycle;
mod spec;
mod status;

pub use election_core::{Candidate, Election, ElectionMetadata, Position};
pub use lifecycle::{accepts_votes, resolve_status, ElectionManager, LifecycleError};
pub use spec::{CandidateSpec, ElectionSpec, PositionSpec};
pub use status::ElectionStatus;
