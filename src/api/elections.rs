use chrono::{DateTime, Utc};
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{
    election::{resolve_status, Election, ElectionManager, ElectionSpec},
    mongodb::Id,
};

pub fn routes() -> Vec<Route> {
    routes![
        create_election,
        get_election,
        publish_election,
        unpublish_election,
        reschedule_election,
        approve_candidate,
    ]
}

/// New voting window for an election that has not opened yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Report the election with its status as of now.
fn with_current_status(mut election: Election) -> Json<Election> {
    election.metadata.status = resolve_status(&election.metadata, Utc::now());
    Json(election)
}

#[post("/elections", data = "<spec>", format = "json")]
async fn create_election(
    spec: Json<ElectionSpec>,
    elections: &State<ElectionManager>,
) -> Result<Json<Election>> {
    let election = elections.create(spec.into_inner()).await?;
    Ok(Json(election))
}

#[get("/elections/<election_id>")]
async fn get_election(
    election_id: Id,
    elections: &State<ElectionManager>,
) -> Result<Json<Election>> {
    let election = elections.get(election_id).await?;
    Ok(with_current_status(election))
}

#[post("/elections/<election_id>/publish")]
async fn publish_election(
    election_id: Id,
    elections: &State<ElectionManager>,
) -> Result<Json<Election>> {
    let election = elections.publish(election_id).await?;
    Ok(with_current_status(election))
}

#[post("/elections/<election_id>/unpublish")]
async fn unpublish_election(
    election_id: Id,
    elections: &State<ElectionManager>,
) -> Result<Json<Election>> {
    let election = elections.unpublish(election_id).await?;
    Ok(with_current_status(election))
}

#[put("/elections/<election_id>/schedule", data = "<schedule>", format = "json")]
async fn reschedule_election(
    election_id: Id,
    schedule: Json<ScheduleRequest>,
    elections: &State<ElectionManager>,
) -> Result<Json<Election>> {
    let election = elections
        .reschedule(election_id, schedule.start_time, schedule.end_time)
        .await?;
    Ok(with_current_status(election))
}

#[post("/elections/<election_id>/positions/<position_id>/candidates/<candidate_id>/approve")]
async fn approve_candidate(
    election_id: Id,
    position_id: Id,
    candidate_id: Id,
    elections: &State<ElectionManager>,
) -> Result<Json<Election>> {
    let election = elections
        .approve_candidate(election_id, position_id, candidate_id)
        .await?;
    Ok(with_current_status(election))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use crate::model::{election::ElectionStatus, ledger::VoteStore};
    use crate::testing::TestStore;

    use super::*;

    async fn create(client: &Client, spec: &ElectionSpec) -> Election {
        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(serde_json::to_string(spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    async fn post_expect_status(client: &Client, uri: String, status: Status) -> Option<Election> {
        let response = client.post(uri).dispatch().await;
        assert_eq!(status, response.status());
        if status == Status::Ok {
            Some(serde_json::from_str(&response.into_string().await.unwrap()).unwrap())
        } else {
            None
        }
    }

    #[backend_test]
    async fn create_and_publish(client: Client, store: TestStore) {
        let spec = ElectionSpec::future_example();
        let election = create(&client, &spec).await;
        assert_eq!(election.metadata.status, ElectionStatus::Draft);
        assert_eq!(election.metadata.title, spec.title);
        assert!(election
            .positions
            .iter()
            .flat_map(|p| &p.candidates)
            .all(|c| !c.verified));
        let stored = store.election(election.id).await.unwrap().unwrap();
        assert_eq!(stored.positions.len(), spec.positions.len());
        assert_eq!(stored.metadata.status, ElectionStatus::Draft);

        let published = post_expect_status(
            &client,
            uri!(publish_election(election.id)).to_string(),
            Status::Ok,
        )
        .await
        .unwrap();
        assert_eq!(published.metadata.status, ElectionStatus::Upcoming);

        // Publishing twice is an illegal transition.
        post_expect_status(
            &client,
            uri!(publish_election(election.id)).to_string(),
            Status::Conflict,
        )
        .await;
        post_expect_status(
            &client,
            uri!(publish_election(Id::new())).to_string(),
            Status::NotFound,
        )
        .await;
    }

    #[backend_test]
    async fn malformed_elections_are_refused(client: Client) {
        let mut spec = ElectionSpec::future_example();
        spec.end_time = spec.start_time - Duration::hours(1);
        let response = client
            .post(uri!(create_election))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&spec).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());

        let mut spec = ElectionSpec::future_example();
        spec.positions.clear();
        let election = create(&client, &spec).await;
        post_expect_status(
            &client,
            uri!(publish_election(election.id)).to_string(),
            Status::BadRequest,
        )
        .await;
    }

    #[backend_test]
    async fn get_reports_resolved_status(client: Client, store: TestStore) {
        let election = Election::active_example();
        store.insert_election(&election).await.unwrap();
        // Stored as upcoming; the window is open, so it reads as active.
        assert_eq!(election.metadata.status, ElectionStatus::Upcoming);

        let response = client.get(uri!(get_election(election.id))).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let fetched: Election =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(fetched.metadata.status, ElectionStatus::Active);

        let response = client.get(uri!(get_election(Id::new()))).dispatch().await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn overrides_before_opening(client: Client, store: TestStore) {
        let election = Election::upcoming_example();
        store.insert_election(&election).await.unwrap();

        let schedule = ScheduleRequest {
            start_time: election.metadata.start_time + Duration::days(1),
            end_time: election.metadata.end_time + Duration::days(1),
        };
        let response = client
            .put(uri!(reschedule_election(election.id)))
            .header(ContentType::JSON)
            .body(serde_json::to_string(&schedule).unwrap())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let stored = store.election(election.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata.start_time, schedule.start_time);

        let draft = post_expect_status(
            &client,
            uri!(unpublish_election(election.id)).to_string(),
            Status::Ok,
        )
        .await
        .unwrap();
        assert_eq!(draft.metadata.status, ElectionStatus::Draft);

        // Too late once voting has started.
        let active = Election::active_example();
        store.insert_election(&active).await.unwrap();
        post_expect_status(
            &client,
            uri!(unpublish_election(active.id)).to_string(),
            Status::Conflict,
        )
        .await;
    }

    #[backend_test]
    async fn approve_candidate_marks_verified(client: Client, store: TestStore) {
        let election = Election::active_example();
        store.insert_election(&election).await.unwrap();
        let president = election.president();

        let updated = post_expect_status(
            &client,
            uri!(approve_candidate(
                election.id,
                president.id,
                president.unapproved().id
            ))
            .to_string(),
            Status::Ok,
        )
        .await
        .unwrap();
        assert!(updated.president().unapproved().verified);

        post_expect_status(
            &client,
            uri!(approve_candidate(election.id, president.id, Id::new())).to_string(),
            Status::NotFound,
        )
        .await;
    }
}
