//! `tokio` based runtime implementation, used by [`XdsClientBuilder::build`](crate::XdsClientBuilder::build)
//! to drive the worker task and its reconnect backoff.

use crate::runtime::Runtime;
use std::future::Future;
use std::time::Duration;

/// Tokio-based runtime implementation.
#[derive(Clone, Debug, Default)]
pub struct TokioRuntime;

impl Runtime for TokioRuntime {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(future);
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn spawn_runs_the_future_on_the_tokio_executor() {
        let (tx, rx) = oneshot::channel();
        TokioRuntime.spawn(async move {
            let _ = tx.send(42);
        });
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_at_least_the_requested_duration() {
        let start = tokio::time::Instant::now();
        TokioRuntime.sleep(Duration::from_secs(5)).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
