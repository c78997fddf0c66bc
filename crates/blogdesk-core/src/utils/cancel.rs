use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Race `fut` against `cancel`. Returns `None` if the token fired first.
///
/// Cancellation wins ties so a call started after shutdown never reaches
/// the network.
pub async fn run_cancellable<F>(cancel: &CancellationToken, fut: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}
