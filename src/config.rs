use std::sync::Arc;
use std::time::Duration;

use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::{
    election::ElectionManager,
    identity::{
        HttpOracle, IdentityGate, SimilarityOracle, DEFAULT_ORACLE_TIMEOUT, DEFAULT_THRESHOLD,
    },
    ledger::{MongoStore, VoteStore},
    mongodb::ensure_indexes_exist,
    results::ResultsAggregator,
    voting::PollingStation,
};

/// Name of the production database.
pub const DATABASE_NAME: &str = "univote";

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_oracle_timeout_ms() -> u64 {
    DEFAULT_ORACLE_TIMEOUT.as_millis() as u64
}

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_threshold")]
    verification_threshold: f64,
    #[serde(default = "default_oracle_timeout_ms")]
    oracle_timeout_ms: u64,
}

impl Config {
    pub fn new(verification_threshold: f64, oracle_timeout: Duration) -> Self {
        Self {
            verification_threshold,
            oracle_timeout_ms: oracle_timeout.as_millis() as u64,
        }
    }

    /// Similarity scores must strictly exceed this to verify a voter.
    pub fn verification_threshold(&self) -> f64 {
        self.verification_threshold
    }

    /// How long a vote waits for the similarity oracle.
    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_millis(self.oracle_timeout_ms)
    }

    fn check(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.verification_threshold) {
            return Err(format!(
                "`verification_threshold` must be between 0 and 100, got {}",
                self.verification_threshold
            ));
        }
        if self.oracle_timeout_ms == 0 {
            return Err("`oracle_timeout_ms` must be positive".to_string());
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_ORACLE_TIMEOUT)
    }
}

/// A fairing that loads the application config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        if let Err(e) = config.check() {
            error!("Invalid application config: {e}");
            return Err(rocket);
        }
        info!(
            "Verification threshold {}, oracle timeout {:?}",
            config.verification_threshold(),
            config.oracle_timeout()
        );
        Ok(rocket.manage(config))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// ensures the indexes the ledger relies on exist, and places the resulting
/// `VoteStore` into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(DATABASE_NAME);

        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to create database indexes: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        let store: Arc<dyn VoteStore> = Arc::new(MongoStore::new(client, db));
        Ok(rocket.manage(store))
    }
}

/// Configuration for the similarity oracle.
#[derive(Deserialize)]
struct OracleConfig {
    oracle_url: String,
}

/// A fairing that builds the HTTP similarity oracle client and places it
/// into managed state. Must be attached after [`ConfigFairing`].
pub struct OracleFairing;

#[rocket::async_trait]
impl Fairing for OracleFairing {
    fn info(&self) -> Info {
        Info {
            name: "Similarity oracle",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<OracleConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load oracle config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let timeout = match rocket.state::<Config>() {
            Some(app_config) => app_config.oracle_timeout(),
            None => {
                error!("Application config must be loaded before the oracle");
                return Err(rocket);
            }
        };
        let oracle = match HttpOracle::new(&config.oracle_url, timeout) {
            Ok(oracle) => oracle,
            Err(e) => {
                error!("Failed to build oracle client: {e}");
                return Err(rocket);
            }
        };
        info!("Using similarity oracle at {}", config.oracle_url);

        let oracle: Arc<dyn SimilarityOracle> = Arc::new(oracle);
        Ok(rocket.manage(oracle))
    }
}

/// A fairing that wires the managed store, oracle and config into the
/// services the endpoints use. Must be attached after the fairings that
/// provide them.
pub struct ServicesFairing;

#[rocket::async_trait]
impl Fairing for ServicesFairing {
    fn info(&self) -> Info {
        Info {
            name: "Services",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let store = rocket.state::<Arc<dyn VoteStore>>().cloned();
        let oracle = rocket.state::<Arc<dyn SimilarityOracle>>().cloned();
        let config = rocket.state::<Config>().cloned();
        let (store, oracle, config) = match (store, oracle, config) {
            (Some(store), Some(oracle), Some(config)) => (store, oracle, config),
            _ => {
                error!("Store, oracle and config must all be set up before the services");
                return Err(rocket);
            }
        };

        let gate = IdentityGate::new(
            store.clone(),
            oracle,
            config.verification_threshold(),
            config.oracle_timeout(),
        );
        let station = PollingStation::new(store.clone(), gate);
        Ok(rocket
            .manage(station.ledger().clone())
            .manage(station)
            .manage(ElectionManager::new(store.clone()))
            .manage(ResultsAggregator::new(store)))
    }
}
