//! Final artifact assembly.

mod document;
mod traits;

pub use document::DocumentFinalizer;
pub use traits::Finalizer;
