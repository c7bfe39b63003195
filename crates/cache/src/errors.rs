//! Error handling for the cache engine
//!
//! Every failure carries a [`RecoveryHint`] telling the caller how to proceed.
//! Most variants mean "skip the cache and go to the original data source";
//! only configuration and key errors point at a caller bug.

mod conversions;
mod display;
mod recovery;
mod types;

pub use types::*;
