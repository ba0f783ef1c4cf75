//! Client registration performed while a run initializes.

mod plan_registrar;
mod traits;

pub use plan_registrar::PlanRegistrar;
pub use traits::{ClientRegistrar, NoopRegistrar};
