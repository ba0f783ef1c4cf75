//! Domain events: emitter contract, channel handle, background writer and storage.

mod handle;
mod sqlite;
mod store;
mod traits;
mod types;

pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use traits::*;
pub use types::*;
