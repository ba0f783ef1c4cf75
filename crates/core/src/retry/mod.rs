//! Bounded retry with exponential backoff and full jitter.
//!
//! [`RetryExecutor`] wraps a single step invocation. Failures whose class is
//! in the policy's retryable set are retried up to `max_attempts` times,
//! sleeping `uniform(0, min(cap, base * multiplier^(k-1)))` between attempts.
//! Anything else is returned on first occurrence.

mod executor;
mod policy;

pub use executor::{RetryExecutor, RetryObserver, TracingObserver};
pub use policy::{JitterStrategy, RetryPolicies, RetryPolicy};
