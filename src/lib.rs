#[macro_use]
extern crate rocket;
#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate backend_test;

use std::sync::Arc;

use rocket::{Build, Rocket};

use crate::config::{Config, ConfigFairing, DatabaseFairing, OracleFairing, ServicesFairing};
use crate::logging::LoggerFairing;
use crate::model::{identity::SimilarityOracle, ledger::VoteStore};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

#[cfg(test)]
mod testing;

/// Build the server from configuration: MongoDB storage and the HTTP
/// similarity oracle.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(OracleFairing)
        .attach(ServicesFairing)
}

/// Build the server around an existing store and oracle.
pub fn rocket_for_services(
    store: Arc<dyn VoteStore>,
    oracle: Arc<dyn SimilarityOracle>,
    config: Config,
) -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(LoggerFairing)
        .manage(config)
        .manage(store)
        .manage(oracle)
        .attach(ServicesFairing)
}
