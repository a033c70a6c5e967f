use std::fmt::{Display, Formatter};

use mongodb::bson::{to_bson, Bson};
use serde::{Deserialize, Serialize};

/// States in the election lifecycle, in the only order they may be visited.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionStatus {
    /// Under construction, only visible to admins.
    Draft,
    /// Published, waiting for the voting window to open.
    Upcoming,
    /// Inside the voting window: the only state that accepts votes.
    Active,
    /// The voting window has closed.
    Completed,
}

impl Display for ElectionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Draft => "draft",
            Self::Upcoming => "upcoming",
            Self::Active => "active",
            Self::Completed => "completed",
        };
        write!(f, "{name}")
    }
}

impl From<ElectionStatus> for Bson {
    fn from(status: ElectionStatus) -> Self {
        to_bson(&status).expect("Serialisation is infallible")
    }
}
