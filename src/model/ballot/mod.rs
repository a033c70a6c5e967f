use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

mod validator;

pub use validator::{check_reference, BallotValidator};

/// A voter's selection of one candidate for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotChoice {
    pub voter_id: Id,
    pub election_id: Id,
    pub position_id: Id,
    pub candidate_id: Id,
}
