use std::future::Future;
use std::time::{Duration, Instant};

use mongodb::{
    bson::{doc, Bson, Document},
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    options::{Acknowledgment, ReadConcern, TransactionOptions, UpdateOptions, WriteConcern},
    Client, ClientSession, Database,
};
use rand::Rng;
use rocket::{futures::TryStreamExt, tokio::time::sleep};

use crate::error::{Error, Result};
use crate::model::{
    election::Election,
    mongodb::{
        duplicate_key_message, violates_index, Coll, Id, TOTALS_UNIQUENESS_INDEX,
        VOTE_UNIQUENESS_INDEX,
    },
    voter::Voter,
};

use super::{CandidateTotals, CountsByCandidate, Revalidate, Vote, VoteStore};

/// Concurrent transactions on the same key conflict until one of them
/// commits, which can take a majority write acknowledgement.
const TRANSACTION_RETRIES: RetryPolicy = RetryPolicy {
    budget: Duration::from_secs(30),
    first_backoff: Duration::from_millis(5),
    max_backoff: Duration::from_millis(250),
};

/// How many times a commit with an unknown outcome is retried.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// MongoDB-backed storage. Vote recording uses multi-document transactions,
/// so the deployment must be a replica set.
#[derive(Clone)]
pub struct MongoStore {
    client: Client,
    db: Database,
}

impl MongoStore {
    pub fn new(client: Client, db: Database) -> Self {
        Self { client, db }
    }

    /// Make sure every candidate of the election has a counter, without
    /// touching existing ones.
    async fn ensure_counters(&self, election: &Election) -> Result<()> {
        let totals = Coll::<CandidateTotals>::from_db(&self.db);
        let upsert = UpdateOptions::builder().upsert(true).build();
        for position in &election.positions {
            for candidate in &position.candidates {
                let filter = totals_filter(election.id, position.id, candidate.id);
                let update = doc! { "$setOnInsert": { "vote_count": 0_i64 } };
                totals.update_one(filter, update, upsert.clone()).await?;
            }
        }
        Ok(())
    }

    /// One attempt at the vote unit of work.
    async fn vote_transaction(&self, vote: &Vote, revalidate: Revalidate<'_>) -> Result<()> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(transaction_options()).await?;
        if let Err(e) = self.vote_writes(&mut session, vote, revalidate).await {
            abort(&mut session).await;
            return Err(e);
        }
        commit(&mut session).await
    }

    async fn vote_writes(
        &self,
        session: &mut ClientSession,
        vote: &Vote,
        revalidate: Revalidate<'_>,
    ) -> Result<()> {
        // Re-read the election inside the transaction: status and candidate
        // approval may have changed since the caller last looked.
        let election = Coll::<Election>::from_db(&self.db)
            .find_one_with_session(vote.election_id.as_doc(), None, session)
            .await?
            .ok_or(Error::ElectionNotOpen)?;
        revalidate(&election)?;

        Coll::<Vote>::from_db(&self.db)
            .insert_one_with_session(vote, None, session)
            .await
            .map_err(|e| {
                if violates_index(&e, VOTE_UNIQUENESS_INDEX) {
                    Error::AlreadyVoted
                } else {
                    Error::Db(e)
                }
            })?;

        let filter = totals_filter(vote.election_id, vote.position_id, vote.candidate_id);
        let update = doc! { "$inc": { "vote_count": 1_i64 } };
        let upsert = UpdateOptions::builder().upsert(true).build();
        let result = Coll::<CandidateTotals>::from_db(&self.db)
            .update_one_with_session(filter, update, upsert, session)
            .await?;
        if result.matched_count + u64::from(result.upserted_id.is_some()) != 1 {
            return Err(Error::Internal(format!(
                "counter for candidate {} was not incremented",
                vote.candidate_id
            )));
        }
        Ok(())
    }

    /// One attempt at the void unit of work.
    async fn void_transaction(&self, vote_id: Id) -> Result<Option<Vote>> {
        let mut session = self.client.start_session(None).await?;
        session.start_transaction(transaction_options()).await?;
        match self.void_writes(&mut session, vote_id).await {
            Ok(Some(vote)) => {
                commit(&mut session).await?;
                Ok(Some(vote))
            }
            Ok(None) => {
                abort(&mut session).await;
                Ok(None)
            }
            Err(e) => {
                abort(&mut session).await;
                Err(e)
            }
        }
    }

    async fn void_writes(&self, session: &mut ClientSession, vote_id: Id) -> Result<Option<Vote>> {
        let vote = match Coll::<Vote>::from_db(&self.db)
            .find_one_and_delete_with_session(vote_id.as_doc(), None, session)
            .await?
        {
            Some(vote) => vote,
            None => return Ok(None),
        };
        let mut filter = totals_filter(vote.election_id, vote.position_id, vote.candidate_id);
        filter.insert("vote_count", doc! { "$gt": 0_i64 });
        let update = doc! { "$inc": { "vote_count": -1_i64 } };
        let result = Coll::<CandidateTotals>::from_db(&self.db)
            .update_one_with_session(filter, update, None, session)
            .await?;
        if result.modified_count != 1 {
            return Err(Error::Internal(format!(
                "no positive counter for candidate {} while voiding vote {vote_id}",
                vote.candidate_id
            )));
        }
        Ok(Some(vote))
    }
}

#[rocket::async_trait]
impl VoteStore for MongoStore {
    async fn election(&self, election_id: Id) -> Result<Option<Election>> {
        let election = Coll::<Election>::from_db(&self.db)
            .find_one(election_id.as_doc(), None)
            .await?;
        Ok(election)
    }

    async fn insert_election(&self, election: &Election) -> Result<()> {
        Coll::<Election>::from_db(&self.db)
            .insert_one(election, None)
            .await?;
        self.ensure_counters(election).await
    }

    async fn replace_election(&self, election: &Election) -> Result<()> {
        let result = Coll::<Election>::from_db(&self.db)
            .replace_one(election.id.as_doc(), election, None)
            .await?;
        if result.matched_count == 0 {
            return Err(Error::not_found(format!("Election with ID '{}'", election.id)));
        }
        self.ensure_counters(election).await
    }

    async fn voter(&self, voter_id: Id) -> Result<Option<Voter>> {
        let voter = Coll::<Voter>::from_db(&self.db)
            .find_one(voter_id.as_doc(), None)
            .await?;
        Ok(voter)
    }

    async fn count_voters(&self) -> Result<u64> {
        let count = Coll::<Voter>::from_db(&self.db)
            .count_documents(None, None)
            .await?;
        Ok(count)
    }

    async fn find_vote(&self, voter_id: Id, position_id: Id) -> Result<Option<Vote>> {
        let filter = doc! {
            "voter_id": voter_id,
            "position_id": position_id,
        };
        let vote = Coll::<Vote>::from_db(&self.db).find_one(filter, None).await?;
        Ok(vote)
    }

    async fn votes_by_voter(&self, voter_id: Id, election_id: Id) -> Result<Vec<Vote>> {
        let filter = doc! {
            "voter_id": voter_id,
            "election_id": election_id,
        };
        let votes = Coll::<Vote>::from_db(&self.db)
            .find(filter, None)
            .await?
            .try_collect()
            .await?;
        Ok(votes)
    }

    async fn commit_vote(&self, vote: &Vote, revalidate: Revalidate<'_>) -> Result<()> {
        let what = format!("Vote {}", vote.id);
        let result = TRANSACTION_RETRIES
            .run(&what, is_retryable, move || self.vote_transaction(vote, revalidate))
            .await;
        match result {
            Err(e) if is_retryable(&e) => {
                warn!("{what} still conflicting after {:?}", TRANSACTION_RETRIES.budget);
                let stored = self.find_vote(vote.voter_id, vote.position_id).await?;
                settle_exhausted(e, vote, stored)
            }
            result => result.map_err(unexpected_duplicates),
        }
    }

    async fn void_vote(&self, vote_id: Id) -> Result<Option<Vote>> {
        let what = format!("Voiding vote {vote_id}");
        TRANSACTION_RETRIES
            .run(&what, is_retryable, move || self.void_transaction(vote_id))
            .await
            .map_err(unexpected_duplicates)
    }

    async fn candidate_totals(&self, election_id: Id) -> Result<Vec<CandidateTotals>> {
        let totals = Coll::<CandidateTotals>::from_db(&self.db)
            .find(doc! { "election_id": election_id }, None)
            .await?
            .try_collect()
            .await?;
        Ok(totals)
    }

    async fn count_votes(&self, election_id: Id) -> Result<CountsByCandidate> {
        let pipeline = vec![
            doc! { "$match": { "election_id": election_id } },
            doc! {
                "$group": {
                    "_id": { "position_id": "$position_id", "candidate_id": "$candidate_id" },
                    "count": { "$sum": 1 },
                }
            },
        ];
        let mut cursor = Coll::<Vote>::from_db(&self.db)
            .aggregate(pipeline, None)
            .await?;
        let mut counts = CountsByCandidate::new();
        while let Some(group) = cursor.try_next().await? {
            let (key, count) = parse_count_group(&group).ok_or_else(|| {
                Error::Internal(format!("malformed vote count group {group}"))
            })?;
            counts.insert(key, count);
        }
        Ok(counts)
    }

    async fn count_participants(&self, election_id: Id) -> Result<u64> {
        let voters = Coll::<Vote>::from_db(&self.db)
            .distinct("voter_id", doc! { "election_id": election_id }, None)
            .await?;
        Ok(voters.len() as u64)
    }
}

/// Bounds how long a unit of work keeps retrying transient conflicts.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    budget: Duration,
    first_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    /// Randomised delay before the given retry: between half and all of a
    /// cap that doubles with each retry up to `max_backoff`.
    fn backoff(&self, retry: u32) -> Duration {
        let cap = self
            .first_backoff
            .saturating_mul(1_u32 << retry.min(16))
            .min(self.max_backoff);
        let cap_micros = cap.as_micros() as u64;
        Duration::from_micros(rand::thread_rng().gen_range(cap_micros / 2..=cap_micros))
    }

    /// Run `attempt` until it succeeds, fails with an error `retryable`
    /// doesn't accept, or the budget runs out. Returns the last outcome.
    async fn run<T, F, Fut>(
        &self,
        what: &str,
        retryable: fn(&Error) -> bool,
        mut attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut retry = 0;
        loop {
            match attempt().await {
                Err(e) if retryable(&e) && started.elapsed() < self.budget => {
                    let delay = self.backoff(retry);
                    debug!("{what} hit a transient conflict, retrying in {delay:?}: {e}");
                    retry += 1;
                    sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

fn transaction_options() -> TransactionOptions {
    TransactionOptions::builder()
        .read_concern(ReadConcern::snapshot())
        .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
        .build()
}

fn totals_filter(election_id: Id, position_id: Id, candidate_id: Id) -> Document {
    doc! {
        "election_id": election_id,
        "position_id": position_id,
        "candidate_id": candidate_id,
    }
}

/// Commit, retrying while the server can't tell us whether it worked.
/// Committing is idempotent, so this can never double-apply.
async fn commit(session: &mut ClientSession) -> Result<()> {
    let mut attempt = 1;
    loop {
        match session.commit_transaction().await {
            Err(e)
                if attempt < MAX_COMMIT_ATTEMPTS
                    && e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT) =>
            {
                debug!("Commit outcome unknown on attempt {attempt}, retrying: {e}");
                attempt += 1;
            }
            result => return result.map_err(Error::from),
        }
    }
}

async fn abort(session: &mut ClientSession) {
    if let Err(e) = session.abort_transaction().await {
        warn!("Failed to abort transaction: {e}");
    }
}

/// Transient transaction errors are safe to retry from the start. So is a
/// race to create the same counter: the retry finds it and increments it.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Db(e) => {
            e.contains_label(TRANSIENT_TRANSACTION_ERROR)
                || violates_index(e, TOTALS_UNIQUENESS_INDEX)
        }
        _ => false,
    }
}

/// Resolve a vote whose transaction conflicted until the retry budget ran
/// out, given the vote now stored for its (voter, position). Losing the
/// race to another vote is a double vote like any other.
fn settle_exhausted(err: Error, vote: &Vote, stored: Option<Vote>) -> Result<()> {
    match stored {
        Some(stored) if stored.id == vote.id => Ok(()),
        Some(_) => Err(Error::AlreadyVoted),
        None => Err(unexpected_duplicates(err)),
    }
}

/// Any uniqueness violation still standing at this point is not the one
/// we expect, and must not be mistaken for a double vote.
fn unexpected_duplicates(err: Error) -> Error {
    match err {
        Error::Db(e) => match duplicate_key_message(&e).map(str::to_string) {
            Some(message) => Error::StorageConflict(message),
            None => Error::Db(e),
        },
        other => other,
    }
}

fn parse_count_group(group: &Document) -> Option<((Id, Id), u64)> {
    let key = group.get_document("_id").ok()?;
    let position_id = key.get_object_id("position_id").ok()?;
    let candidate_id = key.get_object_id("candidate_id").ok()?;
    let count = match group.get("count")? {
        Bson::Int32(n) => u64::try_from(*n).ok()?,
        Bson::Int64(n) => u64::try_from(*n).ok()?,
        _ => return None,
    };
    Some(((position_id.into(), candidate_id.into()), count))
}
