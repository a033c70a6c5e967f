use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

use super::{Candidate, Election, ElectionMetadata, ElectionStatus, Position};

/// An election specification, as submitted by an administrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub require_identity_verification: bool,
    #[serde(default)]
    pub allow_abstentions: bool,
    pub positions: Vec<PositionSpec>,
}

impl ElectionSpec {
    /// Convert this spec into a draft election with fresh unique IDs.
    pub fn into_election(self) -> Election {
        Election {
            id: Id::new(),
            metadata: ElectionMetadata {
                title: self.title,
                description: self.description,
                status: ElectionStatus::Draft,
                start_time: self.start_time,
                end_time: self.end_time,
                require_identity_verification: self.require_identity_verification,
                allow_abstentions: self.allow_abstentions,
            },
            positions: self.positions.into_iter().map(PositionSpec::into_position).collect(),
        }
    }
}

/// A position specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_votes")]
    pub max_votes: u32,
    pub candidates: Vec<CandidateSpec>,
}

impl PositionSpec {
    pub fn into_position(self) -> Position {
        Position {
            id: Id::new(),
            title: self.title,
            description: self.description,
            max_votes: self.max_votes,
            candidates: self.candidates.into_iter().map(CandidateSpec::into_candidate).collect(),
        }
    }
}

/// A candidate nomination. Candidates always start unapproved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub person_id: Id,
    #[serde(default)]
    pub manifesto: String,
    #[serde(default)]
    pub image: Option<String>,
}

impl CandidateSpec {
    pub fn into_candidate(self) -> Candidate {
        Candidate {
            id: Id::new(),
            person_id: self.person_id,
            manifesto: self.manifesto,
            image: self.image,
            verified: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_votes() -> u32 {
    1
}
