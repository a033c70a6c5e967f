use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    election::{accepts_votes, Election},
    ledger::VoteStore,
    mongodb::Id,
};

use super::BallotChoice;

/// Check that a ballot refers to an open election, one of its positions, and an
/// approved candidate of that position, in that order.
///
/// Pure, so the ledger can repeat it against the election it reads inside its
/// own unit of work.
pub fn check_reference(
    election: &Election,
    position_id: Id,
    candidate_id: Id,
    now: DateTime<Utc>,
) -> Result<()> {
    if !accepts_votes(&election.metadata, now) {
        return Err(Error::ElectionNotOpen);
    }
    let position = election
        .position(position_id)
        .ok_or_else(|| Error::invalid_reference("invalid position"))?;
    let candidate = position
        .candidate(candidate_id)
        .ok_or_else(|| Error::invalid_reference("invalid candidate"))?;
    if !candidate.verified {
        return Err(Error::CandidateNotApproved);
    }
    Ok(())
}

/// Read-only admission checks for a ballot.
#[derive(Clone)]
pub struct BallotValidator {
    store: Arc<dyn VoteStore>,
}

impl BallotValidator {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    /// Validate a choice against current state.
    ///
    /// The final "already voted" check is advisory: it gives an early answer,
    /// but only the ledger's unique constraint is authoritative.
    pub async fn validate(&self, choice: &BallotChoice, now: DateTime<Utc>) -> Result<()> {
        let election = self
            .store
            .election(choice.election_id)
            .await?
            .ok_or(Error::ElectionNotOpen)?;
        check_reference(&election, choice.position_id, choice.candidate_id, now)?;
        if self
            .store
            .find_vote(choice.voter_id, choice.position_id)
            .await?
            .is_some()
        {
            return Err(Error::AlreadyVoted);
        }
        Ok(())
    }
}
