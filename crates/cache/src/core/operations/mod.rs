//! Cache operations module

mod alloc;
mod lookup;
mod object;
mod read;
mod write;
pub(super) mod utils;

// Operations are implemented directly on the Cache type
