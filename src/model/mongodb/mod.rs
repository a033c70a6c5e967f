mod bson;
mod collection;
mod errors;

pub use bson::Id;
pub use collection::{
    ensure_indexes_exist, Coll, MongoCollection, TOTALS_UNIQUENESS_INDEX, VOTER_KEY_INDEX,
    VOTE_UNIQUENESS_INDEX,
};
pub use errors::{duplicate_key_message, violates_index, DUPLICATE_KEY};
