//! Task invokers run the core computation for a single work item.

mod http;
mod traits;

pub use http::{classify_status, HttpTaskInvoker};
pub use traits::TaskInvoker;
