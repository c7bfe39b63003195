//! Cull candidate ordering
//!
//! Objects that are no longer in use are tracked here until the culler
//! reclaims them. Keys are backing paths relative to the cache root; sizes
//! are in pages.

mod policies;
mod traits;

pub use policies::LruPolicy;
pub use traits::EvictionPolicy;

#[cfg(test)]
mod tests;
