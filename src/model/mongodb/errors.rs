//! For some reason, the mongodb crate doesn't provide error code constants.
//! This module fills in the gaps.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

pub const DUPLICATE_KEY: i32 = 11000;

/// If the given error is a duplicate key violation, return the server's
/// error message, which names the index that was violated.
pub fn duplicate_key_message(err: &DbError) -> Option<&str> {
    match *err.kind {
        ErrorKind::Write(WriteFailure::WriteError(ref e)) if e.code == DUPLICATE_KEY => {
            Some(&e.message)
        }
        ErrorKind::Command(ref e) if e.code == DUPLICATE_KEY => Some(&e.message),
        _ => None,
    }
}

/// Return true if the given error is a duplicate key violation of the
/// index with the given name.
pub fn violates_index(err: &DbError, index_name: &str) -> bool {
    duplicate_key_message(err)
        .map(|msg| msg.contains(index_name))
        .unwrap_or(false)
}
