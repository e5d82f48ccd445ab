//! Result caching.
//!
//! [`CacheKey`] fingerprints a unit of work; [`ResultCache`] persists one
//! [`InvocationResult`](crate::runner::InvocationResult) per key so that a
//! repeated run never calls the solver twice.

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::ResultCache;
