//! Shared fixtures for the hub's integration tests.

pub mod builders;
pub mod fake_invoker;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing_subscriber::{EnvFilter, fmt};
use upgrade_hub::logging::{LOG_ENV_VAR, build_filter};

/// Upper bound for any single step of a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Route hub events to the test harness's captured output.
///
/// Uses the same `UPGRADE_HUB_LOG` directives as the binary, so
/// `UPGRADE_HUB_LOG=upgrade_hub::store=debug` shows store traffic of a
/// failing test.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_value = std::env::var(LOG_ENV_VAR).ok();
        let filter = build_filter(None, env_value.as_deref())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test after [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("hub did not settle within the test timeout")
}

/// Re-run `check` until it holds or [`TEST_TIMEOUT`] passes.
///
/// For state the hub reaches in the background, such as records written by
/// the pending-write retry.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + TEST_TIMEOUT;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(25)).await;
    }
}
