//! The vote ledger: the only writer of votes and candidate counters.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    ballot::{check_reference, BallotChoice},
    election::Election,
    identity::Verification,
    mongodb::Id,
};

#[cfg(test)]
mod memory;
mod mongo;
mod store;
mod vote;

#[cfg(test)]
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use store::{CountsByCandidate, Revalidate, VoteStore};
pub use vote::{CandidateTotals, Vote};

/// Refuse a vote for a verification-required election unless it carries a
/// successful identity check.
pub fn check_verification(election: &Election, verification: Option<&Verification>) -> Result<()> {
    if !election.metadata.require_identity_verification {
        return Ok(());
    }
    match verification {
        Some(outcome) if outcome.is_verified() => Ok(()),
        Some(Verification::Inconclusive(reason)) => {
            Err(Error::VerificationInconclusive(reason.clone()))
        }
        _ => Err(Error::VerificationRequired),
    }
}

/// A counter that disagrees with the vote rows it should be counting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterDiscrepancy {
    pub position_id: Id,
    pub candidate_id: Id,
    /// Value of the denormalized counter (0 if missing).
    pub counter: u64,
    /// Number of vote rows for the candidate.
    pub recorded: u64,
}

/// Result of comparing an election's counters with its vote rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterAudit {
    pub election_id: Id,
    pub candidates_checked: usize,
    pub discrepancies: Vec<CounterDiscrepancy>,
}

impl CounterAudit {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Clone)]
pub struct VoteLedger {
    store: Arc<dyn VoteStore>,
}

impl VoteLedger {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    /// Durably record a vote.
    ///
    /// The election is re-read and the ballot re-checked inside the same unit
    /// of work that inserts the vote and bumps the counter, so a vote can only
    /// land if it was valid at the moment it was written. The (voter,
    /// position) unique constraint is what finally rules out double votes.
    pub async fn record_vote(
        &self,
        choice: &BallotChoice,
        verification: Option<Verification>,
    ) -> Result<Id> {
        let position_id = choice.position_id;
        let candidate_id = choice.candidate_id;
        let supplied = verification.clone();
        let revalidate = move |election: &Election| {
            check_reference(election, position_id, candidate_id, Utc::now())?;
            check_verification(election, supplied.as_ref())
        };

        let vote = Vote::new(choice, verification);
        match self.store.commit_vote(&vote, &revalidate).await {
            Ok(()) => {
                info!(
                    "Recorded vote {} by voter {} for position {} in election {}",
                    vote.id, vote.voter_id, vote.position_id, vote.election_id
                );
                Ok(vote.id)
            }
            Err(e) => {
                if e.is_rejection() {
                    debug!("Vote by voter {} rejected: {e}", choice.voter_id);
                }
                Err(e)
            }
        }
    }

    /// Positions of the election the voter has already voted on.
    pub async fn voted_positions(&self, voter_id: Id, election_id: Id) -> Result<BTreeSet<Id>> {
        let votes = self.store.votes_by_voter(voter_id, election_id).await?;
        Ok(votes.into_iter().map(|v| v.position_id).collect())
    }

    /// Administrative correction: remove a vote and its count.
    ///
    /// This is never part of a voting flow; every use is logged.
    pub async fn void_vote(&self, vote_id: Id, reason: &str) -> Result<Vote> {
        let vote = self
            .store
            .void_vote(vote_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Vote with ID '{vote_id}'")))?;
        warn!(
            "Voided vote {} (voter {}, position {}, candidate {}): {reason}",
            vote.id, vote.voter_id, vote.position_id, vote.candidate_id
        );
        Ok(vote)
    }

    /// Compare every counter of the election against its vote rows.
    pub async fn audit_counters(&self, election_id: Id) -> Result<CounterAudit> {
        let totals = self.store.candidate_totals(election_id).await?;
        let recorded = self.store.count_votes(election_id).await?;

        let keys: BTreeSet<(Id, Id)> = totals
            .iter()
            .map(|t| (t.position_id, t.candidate_id))
            .chain(recorded.keys().copied())
            .collect();
        let discrepancies: Vec<_> = keys
            .iter()
            .filter_map(|&(position_id, candidate_id)| {
                let counter = totals
                    .iter()
                    .find(|t| t.position_id == position_id && t.candidate_id == candidate_id)
                    .map(|t| t.vote_count)
                    .unwrap_or(0);
                let recorded = recorded.get(&(position_id, candidate_id)).copied().unwrap_or(0);
                (counter != recorded).then_some(CounterDiscrepancy {
                    position_id,
                    candidate_id,
                    counter,
                    recorded,
                })
            })
            .collect();

        if !discrepancies.is_empty() {
            error!(
                "Counter audit of election {election_id} found {} discrepancies",
                discrepancies.len()
            );
        }
        Ok(CounterAudit {
            election_id,
            candidates_checked: keys.len(),
            discrepancies,
        })
    }
}
