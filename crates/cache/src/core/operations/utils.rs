//! Shared helpers for cache operations

use crate::errors::{CacheError, Result};
use std::io;
use std::sync::Arc;
use tokio::task::JoinError;

use super::super::types::CacheInner;

/// Run backing filesystem work on the blocking pool
pub(in crate::core) async fn run_blocking<T, F>(
    inner: &Arc<CacheInner>,
    operation: &'static str,
    f: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CacheInner) -> Result<T> + Send + 'static,
{
    let inner = Arc::clone(inner);
    match tokio::task::spawn_blocking(move || f(&inner)).await {
        Ok(result) => result,
        Err(e) => Err(join_error(operation, e)),
    }
}

pub(in crate::core) fn join_error(operation: &'static str, e: JoinError) -> CacheError {
    CacheError::io("", operation, io::Error::new(io::ErrorKind::Other, e))
}
