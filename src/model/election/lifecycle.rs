//! The election lifecycle: `draft -> upcoming -> active -> completed`.
//!
//! Only the administrative transitions are ever written to storage. The
//! clock-driven ones (`upcoming -> active -> completed`) are resolved lazily
//! whenever an election is read, so there is no scheduler to fall behind.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::model::{ledger::VoteStore, mongodb::Id};

use super::{Election, ElectionMetadata, ElectionSpec, ElectionStatus};

/// Reasons an administrative lifecycle action is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("election is {0}, expected draft")]
    NotDraft(ElectionStatus),
    #[error("election is {0}, expected upcoming")]
    NotUpcoming(ElectionStatus),
    #[error("election is {0}; its schedule can no longer change")]
    WindowOpened(ElectionStatus),
    #[error("election has no title")]
    MissingTitle,
    #[error("start time must be before end time")]
    InvalidWindow,
    #[error("election has no positions")]
    NoPositions,
    #[error("position '{0}' must allow at least one vote")]
    InvalidMaxVotes(String),
    #[error("election window has already closed")]
    AlreadyEnded,
}

impl From<LifecycleError> for Error {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::NotDraft(_)
            | LifecycleError::NotUpcoming(_)
            | LifecycleError::WindowOpened(_)
            | LifecycleError::AlreadyEnded => Error::InvalidTransition(err.to_string()),
            LifecycleError::MissingTitle
            | LifecycleError::InvalidWindow
            | LifecycleError::NoPositions
            | LifecycleError::InvalidMaxVotes(_) => Error::BadRequest(err.to_string()),
        }
    }
}

/// Resolve the effective status of an election at the given instant.
///
/// A draft stays a draft regardless of the clock. Otherwise the status is the
/// later of the stored status and the one implied by the voting window, so
/// resolution never moves an election backwards.
pub fn resolve_status(metadata: &ElectionMetadata, now: DateTime<Utc>) -> ElectionStatus {
    if metadata.status == ElectionStatus::Draft {
        return ElectionStatus::Draft;
    }
    let by_clock = if now >= metadata.end_time {
        ElectionStatus::Completed
    } else if now >= metadata.start_time {
        ElectionStatus::Active
    } else {
        ElectionStatus::Upcoming
    };
    metadata.status.max(by_clock)
}

/// Is this election accepting votes at the given instant?
pub fn accepts_votes(metadata: &ElectionMetadata, now: DateTime<Utc>) -> bool {
    resolve_status(metadata, now) == ElectionStatus::Active
}

/// Check the invariants every stored election must satisfy.
pub fn check_well_formed(election: &Election) -> std::result::Result<(), LifecycleError> {
    if election.metadata.start_time >= election.metadata.end_time {
        return Err(LifecycleError::InvalidWindow);
    }
    if let Some(position) = election.positions.iter().find(|p| p.max_votes < 1) {
        return Err(LifecycleError::InvalidMaxVotes(position.title.clone()));
    }
    Ok(())
}

/// `draft -> upcoming`.
pub fn publish(
    election: &mut Election,
    now: DateTime<Utc>,
) -> std::result::Result<(), LifecycleError> {
    let status = resolve_status(&election.metadata, now);
    if status != ElectionStatus::Draft {
        return Err(LifecycleError::NotDraft(status));
    }
    if election.metadata.title.trim().is_empty() {
        return Err(LifecycleError::MissingTitle);
    }
    check_well_formed(election)?;
    if election.positions.is_empty() {
        return Err(LifecycleError::NoPositions);
    }
    if now >= election.metadata.end_time {
        return Err(LifecycleError::AlreadyEnded);
    }
    election.metadata.status = ElectionStatus::Upcoming;
    Ok(())
}

/// Administrative override `upcoming -> draft`, only before the window opens.
pub fn unpublish(
    election: &mut Election,
    now: DateTime<Utc>,
) -> std::result::Result<(), LifecycleError> {
    let status = resolve_status(&election.metadata, now);
    if status != ElectionStatus::Upcoming {
        return Err(LifecycleError::NotUpcoming(status));
    }
    election.metadata.status = ElectionStatus::Draft;
    Ok(())
}

/// Correct the voting window of an election that has not opened yet.
pub fn reschedule(
    election: &mut Election,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    now: DateTime<Utc>,
) -> std::result::Result<(), LifecycleError> {
    let status = resolve_status(&election.metadata, now);
    if status > ElectionStatus::Upcoming {
        return Err(LifecycleError::WindowOpened(status));
    }
    if start_time >= end_time {
        return Err(LifecycleError::InvalidWindow);
    }
    election.metadata.start_time = start_time;
    election.metadata.end_time = end_time;
    Ok(())
}

/// Administrative operations on elections, backed by the store.
#[derive(Clone)]
pub struct ElectionManager {
    store: Arc<dyn VoteStore>,
}

impl ElectionManager {
    pub fn new(store: Arc<dyn VoteStore>) -> Self {
        Self { store }
    }

    /// Fetch an election, failing if it doesn't exist.
    pub async fn get(&self, election_id: Id) -> Result<Election> {
        self.store
            .election(election_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election with ID '{election_id}'")))
    }

    /// Create a new draft election from a specification.
    pub async fn create(&self, spec: ElectionSpec) -> Result<Election> {
        let election = spec.into_election();
        check_well_formed(&election)?;
        self.store.insert_election(&election).await?;
        info!("Created draft election {} '{}'", election.id, election.metadata.title);
        Ok(election)
    }

    pub async fn publish(&self, election_id: Id) -> Result<Election> {
        self.transition(election_id, "published", |e, now| publish(e, now)).await
    }

    pub async fn unpublish(&self, election_id: Id) -> Result<Election> {
        self.transition(election_id, "unpublished", |e, now| unpublish(e, now)).await
    }

    pub async fn reschedule(
        &self,
        election_id: Id,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Election> {
        self.transition(election_id, "rescheduled", |e, now| {
            reschedule(e, start_time, end_time, now)
        })
        .await
    }

    /// Approve a candidate to appear on the ballot.
    pub async fn approve_candidate(
        &self,
        election_id: Id,
        position_id: Id,
        candidate_id: Id,
    ) -> Result<Election> {
        let mut election = self.get(election_id).await?;
        let status = resolve_status(&election.metadata, Utc::now());
        if status == ElectionStatus::Completed {
            return Err(Error::InvalidTransition(format!(
                "cannot approve candidates for a {status} election"
            )));
        }
        let candidate = election
            .position_mut(position_id)
            .ok_or_else(|| Error::not_found(format!("Position with ID '{position_id}'")))?
            .candidate_mut(candidate_id)
            .ok_or_else(|| Error::not_found(format!("Candidate with ID '{candidate_id}'")))?;
        candidate.verified = true;
        self.store.replace_election(&election).await?;
        info!(
            "Approved candidate {candidate_id} for position {position_id} of election {election_id}"
        );
        Ok(election)
    }

    /// Load, apply a transition, and persist.
    async fn transition<F>(&self, election_id: Id, action: &str, apply: F) -> Result<Election>
    where
        F: FnOnce(&mut Election, DateTime<Utc>) -> std::result::Result<(), LifecycleError>,
    {
        let mut election = self.get(election_id).await?;
        if let Err(e) = apply(&mut election, Utc::now()) {
            warn!("Election {election_id} could not be {action}: {e}");
            return Err(e.into());
        }
        self.store.replace_election(&election).await?;
        info!("Election {election_id} {action}");
        Ok(election)
    }
}
