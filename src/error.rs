use mongodb::error::Error as DbError;
use rocket::{http::Status, response::Responder, Request};
use thiserror::Error;

use crate::model::identity::Inconclusive;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Election is not open for voting")]
    ElectionNotOpen,
    #[error("Invalid ballot reference: {0}")]
    InvalidBallotReference(String),
    #[error("Candidate has not been approved to appear on the ballot")]
    CandidateNotApproved,
    #[error("Voter has already voted for this position")]
    AlreadyVoted,
    #[error("Identity verification is required for this election and did not succeed")]
    VerificationRequired,
    #[error("Identity verification was inconclusive: {0}")]
    VerificationInconclusive(Inconclusive),
    #[error("Storage conflict: {0}")]
    StorageConflict(String),
    #[error("Invalid lifecycle transition: {0}")]
    InvalidTransition(String),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid_reference(what: impl Into<String>) -> Self {
        Self::InvalidBallotReference(what.into())
    }

    /// Is this a deterministic rejection of the request, as opposed to an
    /// infrastructure failure?
    pub fn is_rejection(&self) -> bool {
        !self.status().class().is_server_error()
    }

    /// The HTTP status this error is reported with.
    pub fn status(&self) -> Status {
        match self {
            Self::ElectionNotOpen => Status::Forbidden,
            Self::InvalidBallotReference(_) => Status::UnprocessableEntity,
            Self::CandidateNotApproved => Status::UnprocessableEntity,
            Self::AlreadyVoted => Status::Conflict,
            Self::VerificationRequired => Status::Forbidden,
            Self::VerificationInconclusive(reason) => {
                if reason.is_infrastructure_failure() {
                    Status::ServiceUnavailable
                } else {
                    Status::Forbidden
                }
            }
            Self::StorageConflict(_) | Self::Db(_) | Self::Internal(_) => {
                Status::InternalServerError
            }
            Self::InvalidTransition(_) => Status::Conflict,
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> rocket::response::Result<'o> {
        let status = self.status();
        if status.class().is_server_error() {
            error!("{self}");
        } else {
            warn!("Rejected: {self}");
        }
        (status, self.to_string()).respond_to(req)
    }
}
