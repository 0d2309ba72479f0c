use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::{RelayError, Result};

/// Drives `fut` to completion unless `cancel` fires first, in which case `fut`
/// is dropped (closing any connection it holds) and `Cancelled` is returned.
pub(crate) async fn run_or_cancel<F>(cancel: &CancellationToken, fut: F) -> Result<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RelayError::Cancelled),
        output = fut => Ok(output),
    }
}

pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    run_or_cancel(cancel, tokio::time::sleep(duration)).await
}
