//! Runtime abstractions shared by retrying and polling components.

use std::time::Duration;

use async_trait::async_trait;

/// Async sleeping abstraction so retry and poll loops can run on virtual
/// time in tests.
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use clinic_backend::domain::Sleeper;
/// use std::sync::{Arc, Mutex};
/// use std::time::Duration;
/// #[derive(Default)]
/// struct CountingSleeper {
///     calls: Arc<Mutex<u32>>,
/// }
/// #[async_trait]
/// impl Sleeper for CountingSleeper {
///     async fn sleep(&self, _duration: Duration) {
///         *self.calls.lock().expect("calls mutex") += 1;
///     }
/// }
/// # async fn demo() {
/// let sleeper = CountingSleeper::default();
/// sleeper.sleep(Duration::from_millis(25)).await;
/// assert_eq!(*sleeper.calls.lock().expect("calls mutex"), 1);
/// # }
/// ```
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Suspend execution for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Tokio-based sleeper implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
