mod records;
mod schema;
mod sources;
mod store;
mod types;

pub use schema::Database;
pub use store::Store;
pub use types::{DatabaseError, NewRecord, Record, Source, StoreError};
