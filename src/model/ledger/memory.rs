//! An in-process store for tests. A single lock around all state makes every
//! operation its own unit of work, and votes are keyed by (voter, position)
//! just like the unique index in MongoDB. A vote is written before its
//! counter and undone if the increment fails.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use rocket::tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::model::{election::Election, mongodb::Id, voter::Voter};

use super::{CandidateTotals, CountsByCandidate, Revalidate, Vote, VoteStore};

type CounterKey = (Id, Id, Id);

#[derive(Default)]
struct State {
    elections: HashMap<Id, Election>,
    voters: HashMap<Id, Voter>,
    votes: HashMap<Id, Vote>,
    voted: HashSet<(Id, Id)>,
    counters: HashMap<CounterKey, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_next_increment: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the counter increment of the next vote fail after its vote has
    /// been written.
    pub fn fail_next_increment(&self) {
        self.fail_next_increment.store(true, Ordering::SeqCst);
    }

    /// Register a voter. Registration happens upstream in production.
    pub async fn insert_voter(&self, voter: &Voter) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.voters.values().any(|v| v.identity_key == voter.identity_key) {
            return Err(Error::StorageConflict(format!(
                "duplicate identity key {}",
                voter.identity_key
            )));
        }
        state.voters.insert(voter.id, voter.clone());
        Ok(())
    }

    /// Number of stored votes.
    pub async fn vote_count(&self) -> usize {
        self.state.lock().await.votes.len()
    }
}

#[rocket::async_trait]
impl VoteStore for MemoryStore {
    async fn election(&self, election_id: Id) -> Result<Option<Election>> {
        Ok(self.state.lock().await.elections.get(&election_id).cloned())
    }

    async fn insert_election(&self, election: &Election) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.elections.contains_key(&election.id) {
            return Err(Error::StorageConflict(format!("duplicate election {}", election.id)));
        }
        state.elections.insert(election.id, election.clone());
        Ok(())
    }

    async fn replace_election(&self, election: &Election) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.elections.get_mut(&election.id) {
            Some(stored) => {
                *stored = election.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("Election with ID '{}'", election.id))),
        }
    }

    async fn voter(&self, voter_id: Id) -> Result<Option<Voter>> {
        Ok(self.state.lock().await.voters.get(&voter_id).cloned())
    }

    async fn count_voters(&self) -> Result<u64> {
        Ok(self.state.lock().await.voters.len() as u64)
    }

    async fn find_vote(&self, voter_id: Id, position_id: Id) -> Result<Option<Vote>> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .values()
            .find(|v| v.voter_id == voter_id && v.position_id == position_id)
            .cloned())
    }

    async fn votes_by_voter(&self, voter_id: Id, election_id: Id) -> Result<Vec<Vote>> {
        let state = self.state.lock().await;
        Ok(state
            .votes
            .values()
            .filter(|v| v.voter_id == voter_id && v.election_id == election_id)
            .cloned()
            .collect())
    }

    async fn commit_vote(&self, vote: &Vote, revalidate: Revalidate<'_>) -> Result<()> {
        let mut state = self.state.lock().await;
        let election = state
            .elections
            .get(&vote.election_id)
            .ok_or(Error::ElectionNotOpen)?;
        revalidate(election)?;

        let key = (vote.voter_id, vote.position_id);
        if state.voted.contains(&key) {
            return Err(Error::AlreadyVoted);
        }
        if state.votes.contains_key(&vote.id) {
            return Err(Error::StorageConflict(format!("duplicate vote ID {}", vote.id)));
        }
        state.voted.insert(key);
        state.votes.insert(vote.id, vote.clone());

        if self.fail_next_increment.swap(false, Ordering::SeqCst) {
            // Undo the vote insert, as aborting the transaction would.
            state.votes.remove(&vote.id);
            state.voted.remove(&key);
            return Err(Error::Internal(format!(
                "counter for candidate {} was not incremented",
                vote.candidate_id
            )));
        }
        *state
            .counters
            .entry((vote.election_id, vote.position_id, vote.candidate_id))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn void_vote(&self, vote_id: Id) -> Result<Option<Vote>> {
        let mut state = self.state.lock().await;
        let vote = match state.votes.get(&vote_id) {
            Some(vote) => vote.clone(),
            None => return Ok(None),
        };
        let counter_key = (vote.election_id, vote.position_id, vote.candidate_id);
        match state.counters.get_mut(&counter_key) {
            Some(count) if *count > 0 => *count -= 1,
            _ => {
                return Err(Error::Internal(format!(
                    "no positive counter for candidate {} while voiding vote {vote_id}",
                    vote.candidate_id
                )))
            }
        }
        state.votes.remove(&vote_id);
        state.voted.remove(&(vote.voter_id, vote.position_id));
        Ok(Some(vote))
    }

    async fn candidate_totals(&self, election_id: Id) -> Result<Vec<CandidateTotals>> {
        let state = self.state.lock().await;
        Ok(state
            .counters
            .iter()
            .filter(|((e, _, _), _)| *e == election_id)
            .map(|(&(election_id, position_id, candidate_id), &vote_count)| CandidateTotals {
                election_id,
                position_id,
                candidate_id,
                vote_count,
            })
            .collect())
    }

    async fn count_votes(&self, election_id: Id) -> Result<CountsByCandidate> {
        let state = self.state.lock().await;
        let mut counts = CountsByCandidate::new();
        for vote in state.votes.values().filter(|v| v.election_id == election_id) {
            *counts.entry((vote.position_id, vote.candidate_id)).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn count_participants(&self, election_id: Id) -> Result<u64> {
        let state = self.state.lock().await;
        let voters: HashSet<Id> = state
            .votes
            .values()
            .filter(|v| v.election_id == election_id)
            .map(|v| v.voter_id)
            .collect();
        Ok(voters.len() as u64)
    }
}

impl MemoryStore {
    /// Corrupt a counter directly, bypassing the ledger.
    pub async fn tamper_counter(
        &self,
        election_id: Id,
        position_id: Id,
        candidate_id: Id,
        value: u64,
    ) {
        self.state
            .lock()
            .await
            .counters
            .insert((election_id, position_id, candidate_id), value);
    }
}
