use rocket::{serde::json::Json, Route, State};

use crate::error::Result;
use crate::model::{
    ledger::{CounterAudit, VoteLedger},
    mongodb::Id,
    results::{Participation, ResultsAggregator, Tally},
};

pub fn routes() -> Vec<Route> {
    routes![election_results, election_participation, election_audit]
}

#[get("/elections/<election_id>/results")]
async fn election_results(
    election_id: Id,
    results: &State<ResultsAggregator>,
) -> Result<Json<Tally>> {
    Ok(Json(results.tally(election_id).await?))
}

#[get("/elections/<election_id>/participation")]
async fn election_participation(
    election_id: Id,
    results: &State<ResultsAggregator>,
) -> Result<Json<Participation>> {
    Ok(Json(results.participation(election_id).await?))
}

#[get("/elections/<election_id>/audit")]
async fn election_audit(
    election_id: Id,
    ledger: &State<VoteLedger>,
) -> Result<Json<CounterAudit>> {
    Ok(Json(ledger.audit_counters(election_id).await?))
}
