use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{ballot::BallotChoice, identity::Verification, mongodb::Id};

/// The immutable fact that a voter selected a candidate for a position.
///
/// At most one exists per (voter, position); storage enforces this with a
/// unique index rather than trusting callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    #[serde(rename = "_id")]
    pub id: Id,
    pub voter_id: Id,
    pub election_id: Id,
    pub position_id: Id,
    pub candidate_id: Id,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    /// Identity check that accompanied the vote; `None` if the election
    /// doesn't require one and none was supplied.
    pub verification: Option<Verification>,
}

impl Vote {
    pub fn new(choice: &BallotChoice, verification: Option<Verification>) -> Self {
        Self {
            id: Id::new(),
            voter_id: choice.voter_id,
            election_id: choice.election_id,
            position_id: choice.position_id,
            candidate_id: choice.candidate_id,
            cast_at: Utc::now(),
            verification,
        }
    }
}

/// The denormalized vote counter for one candidate. Only the ledger writes it,
/// always in the same unit of work as the vote it counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTotals {
    pub election_id: Id,
    pub position_id: Id,
    pub candidate_id: Id,
    pub vote_count: u64,
}
