use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    election::{resolve_status, Election, ElectionStatus},
    ledger::VoteStore,
    mongodb::Id,
};

/// Votes for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: Id,
    pub votes: u64,
    /// Share of the position's votes, 0-100.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionTally {
    pub position_id: Id,
    pub title: String,
    pub total_votes: u64,
    /// In ballot order.
    pub candidates: Vec<CandidateTally>,
}

impl PositionTally {
    pub fn candidate(&self, candidate_id: Id) -> Option<&CandidateTally> {
        self.candidates.iter().find(|c| c.candidate_id == candidate_id)
    }
}

/// Per-position results of an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub election_id: Id,
    pub status: ElectionStatus,
    pub positions: Vec<PositionTally>,
}

impl Tally {
    pub fn position(&self, position_id: Id) -> Option<&PositionTally> {
        self.positions.iter().find(|p| p.position_id == position_id)
    }
}

/// How many registered voters took part in an election.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub election_id: Id,
    /// Individual votes recorded, across all positions.
    pub votes_cast: u64,
    /// Distinct voters with at least one vote.
    pub voters_participated: u64,
    /// Every registered voter is eligible.
    pub eligible_voters: u64,
    /// `votes_cast / eligible_voters`, 0 with no eligible voters. Exceeds 1
    /// when voters vote on more than one position.
    pub participation_rate: f64,
    /// `voters_participated / eligible_voters`, 0 with no eligible voters.
    pub voter_turnout: f64,
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn percentage(part: u64, whole: u64) -> f64 {
    ratio(part, whole) * 100.0
}

/// Read-only views over recorded votes.
#[derive(Clone)]
pub struct ResultsAggregator {
    store: Arc<dyn VoteStore>,
}

impl ResultsAggregator {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    async fn election(&self, election_id: Id) -> Result<Election> {
        self.store
            .election(election_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))
    }

    /// Current per-candidate totals, read from the ledger's counters.
    ///
    /// Every candidate on the ballot is listed, including those without votes.
    pub async fn tally(&self, election_id: Id) -> Result<Tally> {
        let election = self.election(election_id).await?;
        let totals = self.store.candidate_totals(election_id).await?;
        let count_for = |position_id: Id, candidate_id: Id| {
            totals
                .iter()
                .find(|t| t.position_id == position_id && t.candidate_id == candidate_id)
                .map(|t| t.vote_count)
                .unwrap_or(0)
        };

        let positions = election
            .positions
            .iter()
            .map(|position| {
                let counts: Vec<_> = position
                    .candidates
                    .iter()
                    .map(|c| (c.id, count_for(position.id, c.id)))
                    .collect();
                let total_votes: u64 = counts.iter().map(|(_, votes)| votes).sum();
                PositionTally {
                    position_id: position.id,
                    title: position.title.clone(),
                    total_votes,
                    candidates: counts
                        .into_iter()
                        .map(|(candidate_id, votes)| CandidateTally {
                            candidate_id,
                            votes,
                            percentage: percentage(votes, total_votes),
                        })
                        .collect(),
                }
            })
            .collect();

        Ok(Tally {
            election_id,
            status: resolve_status(&election.metadata, Utc::now()),
            positions,
        })
    }

    pub async fn participation(&self, election_id: Id) -> Result<Participation> {
        // Existence check only.
        self.election(election_id).await?;
        let votes_cast: u64 = self.store.count_votes(election_id).await?.values().sum();
        let voters_participated = self.store.count_participants(election_id).await?;
        let eligible_voters = self.store.count_voters().await?;
        Ok(Participation {
            election_id,
            votes_cast,
            voters_participated,
            eligible_voters,
            participation_rate: ratio(votes_cast, eligible_voters),
            voter_turnout: ratio(voters_participated, eligible_voters),
        })
    }
}
