use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};

use crate::model::{
    election::Election,
    ledger::{CandidateTotals, Vote},
    voter::Voter,
};

/// Name of the unique index that makes double-voting impossible.
pub const VOTE_UNIQUENESS_INDEX: &str = "voter_position_unique";
/// Name of the unique index over candidate counters.
pub const TOTALS_UNIQUENESS_INDEX: &str = "candidate_totals_unique";
/// Name of the unique index over voter identity keys.
pub const VOTER_KEY_INDEX: &str = "identity_key_unique";

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MongoCollection for Election {
    const NAME: &'static str = "elections";
}

impl MongoCollection for Voter {
    const NAME: &'static str = "voters";
}

impl MongoCollection for Vote {
    const NAME: &'static str = "votes";
}

impl MongoCollection for CandidateTotals {
    const NAME: &'static str = "candidate_totals";
}

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = |name: &str| IndexOptions::builder().unique(true).name(name.to_string()).build();

    // Voter collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"identity_key": 1})
        .options(unique(VOTER_KEY_INDEX))
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    // Vote collection: one vote per voter per position.
    let vote_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1, "position_id": 1})
        .options(unique(VOTE_UNIQUENESS_INDEX))
        .build();
    let election_votes_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "candidate_id": 1})
        .build();
    let votes = Coll::<Vote>::from_db(db);
    votes.create_index(vote_index, None).await?;
    votes.create_index(election_votes_index, None).await?;

    // Candidate totals collection.
    let totals_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "position_id": 1, "candidate_id": 1})
        .options(unique(TOTALS_UNIQUENESS_INDEX))
        .build();
    Coll::<CandidateTotals>::from_db(db)
        .create_index(totals_index, None)
        .await?;

    Ok(())
}
