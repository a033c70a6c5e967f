use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

use super::ElectionStatus;

/// An election, as stored in the database. Positions and their candidates
/// are embedded, so deleting an election removes everything it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Election {
    /// Unique ID.
    #[serde(rename = "_id")]
    pub id: Id,
    /// Top-level metadata.
    #[serde(flatten)]
    pub metadata: ElectionMetadata,
    /// Contestable positions, in ballot order.
    pub positions: Vec<Position>,
}

impl Election {
    /// Look up a position of this election.
    pub fn position(&self, position_id: Id) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    /// Mutable lookup of a position of this election.
    pub fn position_mut(&mut self, position_id: Id) -> Option<&mut Position> {
        self.positions.iter_mut().find(|p| p.id == position_id)
    }
}

/// A view on just the election's top-level metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMetadata {
    /// Election title.
    pub title: String,
    /// Free-text description.
    pub description: String,
    /// Stored lifecycle status. Only `Draft` and `Upcoming` are ever written;
    /// the clock-driven states are derived on read.
    pub status: ElectionStatus,
    /// Election start time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// Election end time.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
    /// Whether every vote must carry a successful identity verification.
    pub require_identity_verification: bool,
    /// Whether voters may leave positions blank.
    pub allow_abstentions: bool,
}

/// A contestable role within an election.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Unique ID.
    pub id: Id,
    pub title: String,
    pub description: String,
    /// How many candidates a voter may select. Always at least 1.
    pub max_votes: u32,
    pub candidates: Vec<Candidate>,
}

impl Position {
    /// Look up a candidate standing for this position.
    pub fn candidate(&self, candidate_id: Id) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }

    /// Mutable lookup of a candidate standing for this position.
    pub fn candidate_mut(&mut self, candidate_id: Id) -> Option<&mut Candidate> {
        self.candidates.iter_mut().find(|c| c.id == candidate_id)
    }
}

/// A person standing for a position.
///
/// The candidate's vote count is deliberately not stored here: it lives in
/// the ledger's candidate totals, which only the ledger writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique ID.
    pub id: Id,
    /// The registered person standing.
    pub person_id: Id,
    pub manifesto: String,
    /// Reference to the candidate's ballot image.
    pub image: Option<String>,
    /// Administratively approved to appear on the ballot.
    pub verified: bool,
}

/// Example test data.
#[cfg(test)]
pub mod examples {
    use chrono::Duration;

    use super::*;

    impl Election {
        /// An election in progress with a single "President" position.
        /// Candidate A is approved, candidate B is not.
        pub fn active_example() -> Self {
            let now = Utc::now();
            Self::example_between(now - Duration::days(1), now + Duration::days(1))
        }

        /// A published election that opens tomorrow.
        pub fn upcoming_example() -> Self {
            let now = Utc::now();
            Self::example_between(now + Duration::days(1), now + Duration::days(2))
        }

        /// A published election that closed yesterday.
        pub fn completed_example() -> Self {
            let now = Utc::now();
            Self::example_between(now - Duration::days(2), now - Duration::days(1))
        }

        /// An unpublished election whose window has not opened.
        pub fn draft_example() -> Self {
            let mut election = Self::upcoming_example();
            election.metadata.status = ElectionStatus::Draft;
            election
        }

        fn example_between(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
            Self {
                id: Id::new(),
                metadata: ElectionMetadata {
                    title: "Student Union 2026".to_string(),
                    description: "Annual student union elections".to_string(),
                    status: ElectionStatus::Upcoming,
                    start_time,
                    end_time,
                    require_identity_verification: true,
                    allow_abstentions: false,
                },
                positions: vec![Position::president_example()],
            }
        }

        pub fn president(&self) -> &Position {
            &self.positions[0]
        }
    }

    impl Position {
        pub fn president_example() -> Self {
            Self {
                id: Id::new(),
                title: "President".to_string(),
                description: "Chairs the student union".to_string(),
                max_votes: 1,
                candidates: vec![Candidate::example(true), Candidate::example(false)],
            }
        }

        pub fn approved(&self) -> &Candidate {
            &self.candidates[0]
        }

        pub fn unapproved(&self) -> &Candidate {
            &self.candidates[1]
        }
    }

    impl Candidate {
        pub fn example(verified: bool) -> Self {
            Self {
                id: Id::new(),
                person_id: Id::new(),
                manifesto: "Cheaper coffee in the library".to_string(),
                image: None,
                verified,
            }
        }
    }
}
