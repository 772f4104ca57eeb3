//! Utility functions for the nespresso-ble crate.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Run a fallible operation with a deadline.
///
/// # Errors
///
/// Returns [`Error::Timeout`] naming `operation` if `duration` elapses
/// first, otherwise whatever the operation returns.
pub async fn with_timeout<T, F>(duration: Duration, operation: &'static str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Error::Timeout { operation })?
}
