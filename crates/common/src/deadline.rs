use std::future::Future;
use std::time::Duration;

/// Await `fut`, giving up after `limit` if one is set
///
/// Returns `None` when the limit elapsed first. With no limit this is a plain await.
pub(crate) async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_limit_elapses() {
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert!(within(Some(Duration::from_secs(1)), slow).await.is_none());
    }

    #[tokio::test]
    async fn test_no_limit_waits() {
        assert_eq!(within(None, async { 7 }).await, Some(7));
    }
}
