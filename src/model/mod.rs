pub mod ballot;
pub mod election;
pub mod identity;
pub mod ledger;
pub mod mongodb;
pub mod results;
pub mod voter;
pub mod voting;
