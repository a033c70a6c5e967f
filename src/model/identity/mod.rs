mod gate;
mod oracle;

pub use gate::{
    decide, IdentityGate, Inconclusive, Verification, DEFAULT_ORACLE_TIMEOUT, DEFAULT_THRESHOLD,
};
pub use oracle::{HttpOracle, OracleError, SimilarityOracle};
