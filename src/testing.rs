//! Shared test fixtures: an in-memory store, a scripted similarity oracle,
//! and the Rocket client wired to both.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mongodb::{Client as MongoClient, Database};
use reqwest::StatusCode;
use rocket::local::asynchronous::Client;

use crate::config::Config;
use crate::model::{
    identity::{OracleError, SimilarityOracle, DEFAULT_THRESHOLD},
    ledger::MemoryStore,
    mongodb::ensure_indexes_exist,
};

pub type TestStore = Arc<MemoryStore>;
pub type TestOracle = Arc<ScriptedOracle>;

/// Oracle wait used by test servers, short enough for hanging-oracle tests.
pub const TEST_ORACLE_TIMEOUT: Duration = Duration::from_millis(200);

/// What the scripted oracle does on its next calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OracleBehaviour {
    Score(f64),
    Fail,
    Hang,
}

pub struct ScriptedOracle {
    behaviour: Mutex<OracleBehaviour>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new() -> Self {
        Self {
            behaviour: Mutex::new(OracleBehaviour::Fail),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, behaviour: OracleBehaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    /// How many times the oracle has been consulted.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[rocket::async_trait]
impl SimilarityOracle for ScriptedOracle {
    async fn similarity(&self, _reference: &[u8], _captured: &[u8]) -> Result<f64, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = *self.behaviour.lock().unwrap();
        match behaviour {
            OracleBehaviour::Score(score) => Ok(score),
            OracleBehaviour::Fail => Err(OracleError::Status(StatusCode::BAD_GATEWAY)),
            OracleBehaviour::Hang => {
                rocket::tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(100.0)
            }
        }
    }
}

/// A local client for a server backed by a fresh in-memory store and
/// scripted oracle, which are also returned for direct inspection.
pub async fn setup() -> (Client, TestStore, TestOracle) {
    log4rs_test_utils::test_logging::init_logging_once_for(["univote_backend"], None, None);

    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::new());
    let config = Config::new(DEFAULT_THRESHOLD, TEST_ORACLE_TIMEOUT);
    let rocket = crate::rocket_for_services(store.clone(), oracle.clone(), config);
    let client = Client::tracked(rocket).await.unwrap();
    (client, store, oracle)
}

/// Connect to the configured MongoDB deployment and create a uniquely named
/// database with the ledger's indexes.
pub async fn mongo_setup() -> (MongoClient, Database) {
    let db_uri: String = rocket::Config::figment()
        .extract_inner("db_uri")
        .expect("`db_uri` must be set to run database tests");
    let client = MongoClient::with_uri_str(&db_uri).await.unwrap();
    let random: u32 = rand::random();
    let db_name = format!("test{random}");
    info!("Using database {db_name}");
    let db = client.database(&db_name);
    ensure_indexes_exist(&db).await.unwrap();
    (client, db)
}
