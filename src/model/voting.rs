use std::sync::Arc;

use chrono::Utc;

use crate::error::{Error, Result};
use crate::model::{
    ballot::{BallotChoice, BallotValidator},
    election::accepts_votes,
    identity::{IdentityGate, Verification},
    ledger::{VoteLedger, VoteStore},
    mongodb::Id,
};

/// The end-to-end vote flow: lifecycle, identity, ballot, ledger.
#[derive(Clone)]
pub struct PollingStation {
    store: Arc<dyn VoteStore>,
    gate: IdentityGate,
    validator: BallotValidator,
    ledger: VoteLedger,
}

impl PollingStation {
    pub fn new(store: Arc<dyn VoteStore>, gate: IdentityGate) -> Self {
        Self {
            validator: BallotValidator::new(store.clone()),
            ledger: VoteLedger::new(store.clone()),
            store,
            gate,
        }
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    /// Cast a vote, returning the ID of the recorded vote.
    ///
    /// The oracle is only consulted once the election is known to be open, so
    /// closed elections never cost a similarity check.
    pub async fn cast(&self, choice: &BallotChoice, captured_image: Option<&[u8]>) -> Result<Id> {
        let election = self
            .store
            .election(choice.election_id)
            .await?
            .ok_or(Error::ElectionNotOpen)?;
        if !accepts_votes(&election.metadata, Utc::now()) {
            return Err(Error::ElectionNotOpen);
        }

        let verification = if election.metadata.require_identity_verification {
            let captured = captured_image.ok_or(Error::VerificationRequired)?;
            match self.gate.verify(choice.voter_id, captured).await? {
                outcome if outcome.is_verified() => Some(outcome),
                Verification::Inconclusive(reason) => {
                    return Err(Error::VerificationInconclusive(reason))
                }
                _ => {
                    info!("Identity check rejected voter {}", choice.voter_id);
                    return Err(Error::VerificationRequired);
                }
            }
        } else {
            None
        };

        self.validator.validate(choice, Utc::now()).await?;
        self.ledger.record_vote(choice, verification).await
    }
}
