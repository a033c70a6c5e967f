//! Audit the vote ledger directly in the database: for every election, check
//! that each candidate counter equals the number of votes recorded for that
//! candidate.

use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches, Command};
use mongodb::{bson::doc, Client};
use rocket::futures::TryStreamExt;

use univote_backend::config::DATABASE_NAME;
use univote_backend::model::{
    election::Election,
    ledger::{CounterAudit, MongoStore, VoteLedger},
    mongodb::{Coll, Id},
};

const PROGRAM_NAME: &str = "ledger-audit";

const ABOUT_TEXT: &str = "Check that vote counters agree with recorded votes.

EXIT CODES:
     0: Every counter matches.
   255: Ran successfully, but at least one counter is wrong.
 Other: Error.";

const DB_URI: &str = "DB_URI";
const DB_NAME: &str = "DB_NAME";
const ELECTION_IDS: &str = "ELECTION_ID";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .arg(
            Arg::new(DB_URI)
                .long("db-uri")
                .env("ROCKET_DB_URI")
                .help("MongoDB connection string")
                .action(ArgAction::Set)
                .required(true),
        )
        .arg(
            Arg::new(DB_NAME)
                .long("db-name")
                .help("Database to audit")
                .action(ArgAction::Set)
                .default_value(DATABASE_NAME),
        )
        .arg(
            Arg::new(ELECTION_IDS)
                .help("Elections to audit; all elections if omitted")
                .action(ArgAction::Append)
                .value_parser(clap::value_parser!(Id)),
        )
}

/// Errors that this program may produce.
#[derive(Debug)]
enum Error {
    /// Could not talk to the database.
    Db(String),
}

impl From<mongodb::error::Error> for Error {
    fn from(err: mongodb::error::Error) -> Self {
        Error::Db(err.to_string())
    }
}

impl From<univote_backend::error::Error> for Error {
    fn from(err: univote_backend::error::Error) -> Self {
        Error::Db(err.to_string())
    }
}

/// Audit the given elections, or every election if none are given.
async fn audit(uri: &str, db_name: &str, ids: Vec<Id>) -> Result<Vec<CounterAudit>, Error> {
    let client = Client::with_uri_str(uri).await?;
    let db = client.database(db_name);

    let ids = if ids.is_empty() {
        Coll::<Election>::from_db(&db)
            .find(doc! {}, None)
            .await?
            .map_ok(|election| election.id)
            .try_collect()
            .await?
    } else {
        ids
    };

    let ledger = VoteLedger::new(Arc::new(MongoStore::new(client, db)));
    let mut audits = Vec::with_capacity(ids.len());
    for id in ids {
        audits.push(ledger.audit_counters(id).await?);
    }
    Ok(audits)
}

/// Print one audit, returning whether it was clean.
fn report(audit: &CounterAudit) -> bool {
    if audit.is_consistent() {
        println!(
            "Election {}: {} counter{} OK",
            audit.election_id,
            audit.candidates_checked,
            if audit.candidates_checked != 1 { "s" } else { "" }
        );
        return true;
    }
    println!("Election {}: MISMATCH", audit.election_id);
    for d in &audit.discrepancies {
        println!(
            "  position {} candidate {}: counter says {}, {} vote{} recorded",
            d.position_id,
            d.candidate_id,
            d.counter,
            d.recorded,
            if d.recorded != 1 { "s" } else { "" }
        );
    }
    false
}

/// Exit code summarising a set of audits.
fn exit_code(audits: &[CounterAudit]) -> u8 {
    // Report every election, even after the first failure.
    let clean = audits.iter().map(report).fold(true, |all, ok| all && ok);
    if clean {
        0
    } else {
        255
    }
}

/// Run the audit, report the result, and return the exit code.
async fn run(args: &ArgMatches) -> u8 {
    // Required and defaulted arguments are guaranteed to be present.
    let uri: &String = args.get_one(DB_URI).unwrap();
    let db_name: &String = args.get_one(DB_NAME).unwrap();
    let ids: Vec<Id> = args
        .get_many::<Id>(ELECTION_IDS)
        .map(|ids| ids.copied().collect())
        .unwrap_or_default();

    match audit(uri, db_name, ids).await {
        Ok(audits) => exit_code(&audits),
        Err(Error::Db(msg)) => {
            println!("Database error: {msg}");
            1
        }
    }
}

#[rocket::main]
async fn main() {
    let args = cli().get_matches();
    let exit_code = run(&args).await;
    std::process::exit(exit_code.into())
}

#[cfg(test)]
mod tests {
    use univote_backend::model::ledger::CounterDiscrepancy;

    use super::*;

    fn audit_with(discrepancies: Vec<CounterDiscrepancy>) -> CounterAudit {
        CounterAudit {
            election_id: Id::new(),
            candidates_checked: 2,
            discrepancies,
        }
    }

    #[test]
    fn any_discrepancy_fails() {
        assert_eq!(exit_code(&[]), 0);
        assert_eq!(exit_code(&[audit_with(vec![]), audit_with(vec![])]), 0);

        let bad = audit_with(vec![CounterDiscrepancy {
            position_id: Id::new(),
            candidate_id: Id::new(),
            counter: 4,
            recorded: 3,
        }]);
        assert_eq!(exit_code(&[audit_with(vec![]), bad]), 255);
    }

    #[test]
    fn correct_cli_usage() {
        let id = Id::new().to_string();
        let command_line = [PROGRAM_NAME, "--db-uri", "mongodb://localhost", &id];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert_eq!(args.get_one::<String>(DB_NAME).unwrap(), DATABASE_NAME);
        assert_eq!(args.get_many::<Id>(ELECTION_IDS).unwrap().count(), 1);

        let command_line = [
            PROGRAM_NAME,
            "--db-uri",
            "mongodb://localhost",
            "--db-name",
            "staging",
        ];
        let args = cli().try_get_matches_from(command_line).unwrap();
        assert!(args.get_many::<Id>(ELECTION_IDS).is_none());
    }

    #[test]
    fn bad_cli_usage() {
        // Not an election ID.
        let command_line = [PROGRAM_NAME, "--db-uri", "mongodb://localhost", "seven"];
        cli().try_get_matches_from(command_line).unwrap_err();
    }
}
