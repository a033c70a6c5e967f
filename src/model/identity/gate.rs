use std::sync::Arc;
use std::time::Duration;

use rocket::tokio::time::timeout;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;
use crate::model::{ledger::VoteStore, mongodb::Id};

use super::SimilarityOracle;

/// Similarity scores must exceed this to count as a match.
pub const DEFAULT_THRESHOLD: f64 = 90.0;

/// Upper bound on how long a vote waits for the oracle.
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Outcome of an identity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", content = "reason", rename_all = "snake_case")]
pub enum Verification {
    Verified,
    Rejected,
    Inconclusive(Inconclusive),
}

impl Verification {
    /// Only an explicit match opens the gate; `Rejected` and `Inconclusive`
    /// are equivalent for the purpose of allowing a vote.
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// Why an identity check could not reach a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(rename_all = "snake_case")]
pub enum Inconclusive {
    #[error("no reference image on file")]
    NoReferenceImage,
    #[error("reference image on file is unreadable")]
    UnreadableReference,
    #[error("similarity oracle unavailable: {0}")]
    OracleUnavailable(String),
    #[error("similarity oracle timed out")]
    OracleTimeout,
    #[error("similarity oracle returned invalid score {0}")]
    InvalidScore(f64),
}

impl Inconclusive {
    /// Did verification fail because of the oracle rather than the voter?
    pub fn is_infrastructure_failure(&self) -> bool {
        matches!(
            self,
            Self::OracleUnavailable(_) | Self::OracleTimeout | Self::InvalidScore(_)
        )
    }
}

/// Turn a raw similarity score into a decision.
pub fn decide(score: f64, threshold: f64) -> Verification {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        Verification::Inconclusive(Inconclusive::InvalidScore(score))
    } else if score > threshold {
        Verification::Verified
    } else {
        Verification::Rejected
    }
}

/// Wraps the similarity oracle with the voter's stored reference image, a
/// fixed threshold and a bounded wait. Has no side effects.
#[derive(Clone)]
pub struct IdentityGate {
    store: Arc<dyn VoteStore>,
    oracle: Arc<dyn SimilarityOracle>,
    threshold: f64,
    timeout: Duration,
}

impl IdentityGate {
    pub fn new(
        store: Arc<dyn VoteStore>,
        oracle: Arc<dyn SimilarityOracle>,
        threshold: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            oracle,
            threshold,
            timeout,
        }
    }

    /// Check a freshly captured image against the voter's reference image.
    ///
    /// Only storage failures are returned as errors; every oracle problem is
    /// folded into an `Inconclusive` outcome.
    pub async fn verify(&self, voter_id: Id, captured: &[u8]) -> Result<Verification> {
        let reference = match self.store.voter(voter_id).await? {
            Some(voter) => voter.reference_image_bytes(),
            None => None,
        };
        let reference = match reference {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                warn!("Reference image for voter {voter_id} failed to decode: {e}");
                return Ok(Verification::Inconclusive(Inconclusive::UnreadableReference));
            }
            None => {
                debug!("No reference image on file for voter {voter_id}");
                return Ok(Verification::Inconclusive(Inconclusive::NoReferenceImage));
            }
        };

        let similarity = self.oracle.similarity(&reference, captured);
        let outcome = match timeout(self.timeout, similarity).await {
            Ok(Ok(score)) => decide(score, self.threshold),
            Ok(Err(e)) => {
                error!("Similarity oracle failed for voter {voter_id}: {e}");
                Verification::Inconclusive(Inconclusive::OracleUnavailable(e.to_string()))
            }
            Err(_) => {
                error!("Similarity oracle timed out after {:?} for voter {voter_id}", self.timeout);
                Verification::Inconclusive(Inconclusive::OracleTimeout)
            }
        };
        debug!("Identity check for voter {voter_id}: {outcome:?}");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::voter::Voter;
    use crate::testing::{OracleBehaviour, TestOracle, TestStore};

    fn gate(store: &TestStore, oracle: &TestOracle) -> IdentityGate {
        IdentityGate::new(
            store.clone(),
            oracle.clone(),
            DEFAULT_THRESHOLD,
            Duration::from_millis(200),
        )
    }

    #[test]
    fn threshold_is_exclusive() {
        assert_eq!(decide(90.5, DEFAULT_THRESHOLD), Verification::Verified);
        assert_eq!(decide(90.0, DEFAULT_THRESHOLD), Verification::Rejected);
        assert_eq!(decide(0.0, DEFAULT_THRESHOLD), Verification::Rejected);
        assert!(matches!(
            decide(f64::NAN, DEFAULT_THRESHOLD),
            Verification::Inconclusive(Inconclusive::InvalidScore(_))
        ));
        assert!(matches!(
            decide(100.5, DEFAULT_THRESHOLD),
            Verification::Inconclusive(Inconclusive::InvalidScore(_))
        ));
    }

    #[backend_test]
    async fn matching_face_is_verified(store: TestStore, oracle: TestOracle) {
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();
        oracle.set(OracleBehaviour::Score(97.0));

        let outcome = gate(&store, &oracle).verify(voter.id, b"captured").await.unwrap();
        assert_eq!(outcome, Verification::Verified);
        assert_eq!(oracle.calls(), 1);
    }

    #[backend_test]
    async fn low_score_is_rejected(store: TestStore, oracle: TestOracle) {
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();
        oracle.set(OracleBehaviour::Score(42.0));

        let outcome = gate(&store, &oracle).verify(voter.id, b"captured").await.unwrap();
        assert_eq!(outcome, Verification::Rejected);
    }

    #[backend_test]
    async fn missing_reference_never_reaches_oracle(store: TestStore, oracle: TestOracle) {
        let voter = Voter::example_without_image();
        store.insert_voter(&voter).await.unwrap();
        oracle.set(OracleBehaviour::Score(100.0));

        let gate = gate(&store, &oracle);
        let outcome = gate.verify(voter.id, b"captured").await.unwrap();
        assert_eq!(
            outcome,
            Verification::Inconclusive(Inconclusive::NoReferenceImage)
        );
        let unknown = gate.verify(Id::new(), b"captured").await.unwrap();
        assert!(!unknown.is_verified());
        assert_eq!(oracle.calls(), 0);
    }

    #[backend_test]
    async fn oracle_failures_fail_closed(store: TestStore, oracle: TestOracle) {
        let voter = Voter::example();
        store.insert_voter(&voter).await.unwrap();
        let gate = gate(&store, &oracle);

        oracle.set(OracleBehaviour::Fail);
        let outcome = gate.verify(voter.id, b"captured").await.unwrap();
        assert!(matches!(
            outcome,
            Verification::Inconclusive(Inconclusive::OracleUnavailable(_))
        ));

        oracle.set(OracleBehaviour::Hang);
        let outcome = gate.verify(voter.id, b"captured").await.unwrap();
        assert_eq!(outcome, Verification::Inconclusive(Inconclusive::OracleTimeout));
        assert!(!outcome.is_verified());
    }
}
