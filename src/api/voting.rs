use std::collections::BTreeSet;

use data_encoding::BASE64;
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    ballot::BallotChoice,
    ledger::{Vote, VoteLedger},
    mongodb::Id,
    voting::PollingStation,
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, voted_positions, void_vote]
}

/// A vote as submitted by an (already authenticated) voter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVoteRequest {
    pub voter_id: Id,
    pub position_id: Id,
    pub candidate_id: Id,
    /// Base64 image captured at the time of voting.
    #[serde(default)]
    pub captured_image: Option<String>,
}

/// Acknowledges a recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote_id: Id,
    pub election_id: Id,
    pub position_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedPositions {
    pub voter_id: Id,
    pub election_id: Id,
    pub positions: BTreeSet<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidRequest {
    pub reason: String,
}

#[post("/elections/<election_id>/votes", data = "<request>", format = "json")]
async fn cast_vote(
    election_id: Id,
    request: Json<CastVoteRequest>,
    station: &State<PollingStation>,
) -> Result<Json<VoteReceipt>> {
    let request = request.into_inner();
    let captured = request
        .captured_image
        .map(|encoded| BASE64.decode(encoded.as_bytes()))
        .transpose()
        .map_err(|e| Error::BadRequest(format!("captured image is not valid base64: {e}")))?;
    let choice = BallotChoice {
        voter_id: request.voter_id,
        election_id,
        position_id: request.position_id,
        candidate_id: request.candidate_id,
    };

    let vote_id = station.cast(&choice, captured.as_deref()).await?;
    Ok(Json(VoteReceipt {
        vote_id,
        election_id,
        position_id: choice.position_id,
    }))
}

#[get("/elections/<election_id>/voters/<voter_id>/votes")]
async fn voted_positions(
    election_id: Id,
    voter_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<VotedPositions>> {
    let positions = ledger.voted_positions(voter_id, election_id).await?;
    Ok(Json(VotedPositions {
        voter_id,
        election_id,
        positions,
    }))
}

#[delete("/votes/<vote_id>", data = "<request>", format = "json")]
async fn void_vote(
    vote_id: Id,
    request: Json<VoidRequest>,
    ledger: &State<VoteLedger>,
) -> Result<Json<Vote>> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(Error::BadRequest("a reason is required to void a vote".to_string()));
    }
    let vote = ledger.void_vote(vote_id, reason).await?;
    Ok(Json(vote))
}
