use data_encoding::{DecodeError, BASE64};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A registered voter, as stored in the database.
///
/// Registration itself happens upstream; the core only reads voters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Immutable identity key, e.g. the student number. Unique.
    pub identity_key: String,
    /// Base64 reference image for identity verification, if one is on file.
    pub reference_image: Option<String>,
}

impl Voter {
    pub fn new(identity_key: impl Into<String>, reference_image: Option<&[u8]>) -> Self {
        Self {
            id: Id::new(),
            identity_key: identity_key.into(),
            reference_image: reference_image.map(|bytes| BASE64.encode(bytes)),
        }
    }

    /// Decode the stored reference image, if there is one.
    pub fn reference_image_bytes(&self) -> Option<Result<Vec<u8>, DecodeError>> {
        self.reference_image
            .as_ref()
            .map(|encoded| BASE64.decode(encoded.as_bytes()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_image_is_stored_encoded() {
        let voter = Voter::example();
        assert_ne!(voter.reference_image.as_deref(), Some("reference-face"));
        assert_eq!(
            voter.reference_image_bytes().unwrap().unwrap(),
            b"reference-face".to_vec()
        );
        assert!(Voter::example_without_image().reference_image_bytes().is_none());
    }
}
