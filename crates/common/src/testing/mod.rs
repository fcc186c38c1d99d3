//! Helpers for async tests in livlink crates
//!
//! ```rust,ignore
//! use livlink_common::testing::{init_test_tracing, poll_until};
//!
//! #[tokio::test]
//! async fn refresh_eventually_lands() {
//!     init_test_tracing();
//!     let ready = poll_until(Duration::from_secs(1), Duration::from_millis(10), || async {
//!         engine.state().is_some()
//!     })
//!     .await;
//!     assert!(ready);
//! }
//! ```

use std::future::Future;
use std::time::Duration;

/// Assert that an async condition becomes true within a timeout
#[macro_export]
macro_rules! assert_eventually_async {
    ($timeout:expr, $fut:expr) => {{
        let timeout_duration = $timeout;
        let reached = $crate::testing::poll_until(
            timeout_duration,
            std::time::Duration::from_millis(10),
            || $fut,
        )
        .await;

        assert!(reached, "Condition did not become true within {:?}", timeout_duration);
    }};
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses
///
/// Uses tokio's clock, so it cooperates with paused-time tests.
pub async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(interval).await;
    }

    condition().await
}

/// Route `tracing` output through the test harness writer
///
/// Honours `RUST_LOG`; safe to call from every test.
#[cfg(feature = "test-utils")]
pub fn init_test_tracing() {
    static TRACING: std::sync::Once = std::sync::Once::new();
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Validates `poll_until` for the condition-met scenario.
    ///
    /// Assertions:
    /// - Confirms the poll returns true once the counter crosses three.
    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let reached = poll_until(Duration::from_secs(1), Duration::from_millis(10), || {
            let counter = Arc::clone(&counter);
            async move { counter.fetch_add(1, Ordering::SeqCst) >= 3 }
        })
        .await;

        assert!(reached);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let reached =
            poll_until(Duration::from_millis(50), Duration::from_millis(10), || async { false })
                .await;
        assert!(!reached);
    }
}
