//! Run records and the append-only tier status history.

mod sqlite_store;
mod store;

pub use sqlite_store::SqliteStatusStore;
pub use store::{RunFilter, RunRecord, StatusError, StatusStore};
