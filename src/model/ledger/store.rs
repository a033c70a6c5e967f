use std::collections::HashMap;

use crate::error::Result;
use crate::model::{election::Election, mongodb::Id, voter::Voter};

use super::{CandidateTotals, Vote};

/// Checks re-run against the election as read inside a vote's unit of work.
pub type Revalidate<'a> = &'a (dyn Fn(&Election) -> Result<()> + Send + Sync);

/// Vote counts keyed by (position, candidate).
pub type CountsByCandidate = HashMap<(Id, Id), u64>;

/// Everything the vote-integrity core needs from persistent storage.
///
/// Implementations must provide a uniqueness guarantee over
/// (voter, position) and atomic multi-write units of work. Plain reads only
/// need to observe committed data.
#[rocket::async_trait]
pub trait VoteStore: Send + Sync {
    async fn election(&self, election_id: Id) -> Result<Option<Election>>;

    async fn insert_election(&self, election: &Election) -> Result<()>;

    /// Overwrite an existing election. Fails with `NotFound` if it doesn't exist.
    async fn replace_election(&self, election: &Election) -> Result<()>;

    async fn voter(&self, voter_id: Id) -> Result<Option<Voter>>;

    /// Number of registered voters.
    async fn count_voters(&self) -> Result<u64>;

    /// The vote a voter cast for a position, if any.
    async fn find_vote(&self, voter_id: Id, position_id: Id) -> Result<Option<Vote>>;

    /// Every vote a voter cast in an election.
    async fn votes_by_voter(&self, voter_id: Id, election_id: Id) -> Result<Vec<Vote>>;

    /// Record a vote atomically. Within one unit of work:
    ///
    /// 1. read the vote's election and run `revalidate` on it,
    /// 2. insert the vote under the (voter, position) uniqueness constraint,
    ///    failing with `AlreadyVoted` if it is violated,
    /// 3. increment the candidate's counter by one.
    ///
    /// On any error nothing is changed.
    async fn commit_vote(&self, vote: &Vote, revalidate: Revalidate<'_>) -> Result<()>;

    /// Delete a vote and decrement its counter in one unit of work.
    /// Returns the removed vote, or `None` if there was no such vote.
    async fn void_vote(&self, vote_id: Id) -> Result<Option<Vote>>;

    /// The denormalized counters for an election.
    async fn candidate_totals(&self, election_id: Id) -> Result<Vec<CandidateTotals>>;

    /// Vote rows for an election, counted per candidate.
    async fn count_votes(&self, election_id: Id) -> Result<CountsByCandidate>;

    /// Number of distinct voters with at least one vote in an election.
    async fn count_participants(&self, election_id: Id) -> Result<u64>;
}
