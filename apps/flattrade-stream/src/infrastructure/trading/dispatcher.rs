//! Request Dispatcher
//!
//! Throttles trading API calls with two limits fixed at construction:
//!
//! - `max_per_second`: a rolling one-second window of admissions. A call that
//!   finds the window full sleeps until its oldest entry expires, then checks
//!   again.
//! - `max_concurrent`: calls in flight. Excess calls queue FIFO on a fair
//!   semaphore; the slot is released on every exit path.
//!
//! A limit of zero disables it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::infrastructure::metrics::{self, CallOutcome};

use super::error::{ApiError, DispatchError};

const WINDOW: Duration = Duration::from_secs(1);

/// Dispatcher limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Calls allowed in flight at once.
    pub max_concurrent: usize,
    /// Calls admitted per rolling second.
    pub max_per_second: usize,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_per_second: 10,
        }
    }
}

/// Concurrency and rate limiter for API calls.
#[derive(Debug)]
pub struct RequestDispatcher {
    settings: DispatcherSettings,
    slots: Option<Semaphore>,
    window: Mutex<VecDeque<Instant>>,
    queued: AtomicUsize,
}

impl RequestDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub fn new(settings: DispatcherSettings) -> Self {
        let slots = (settings.max_concurrent > 0).then(|| Semaphore::new(settings.max_concurrent));
        Self {
            settings,
            slots,
            window: Mutex::new(VecDeque::with_capacity(settings.max_per_second)),
            queued: AtomicUsize::new(0),
        }
    }

    /// Active limits.
    #[must_use]
    pub const fn settings(&self) -> DispatcherSettings {
        self.settings
    }

    /// Calls currently waiting for a concurrency slot.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }

    /// Run `call` once both limits allow it.
    pub async fn dispatch<T, F, Fut>(
        &self,
        endpoint: &'static str,
        call: F,
    ) -> Result<T, DispatchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let request_id = Uuid::new_v4();
        let span = tracing::debug_span!("api_call", %request_id, endpoint);

        async move {
            self.admit().await;
            let _slot = self.acquire_slot().await?;

            let started = Instant::now();
            let result = call().await;
            let elapsed = started.elapsed();

            let outcome = match &result {
                Ok(_) => CallOutcome::Success,
                Err(ApiError::Unauthorized(_)) => CallOutcome::Unauthorized,
                Err(ApiError::Api { .. }) => CallOutcome::Failure,
                Err(_) => CallOutcome::Error,
            };
            metrics::record_api_call(endpoint, outcome, elapsed);

            if let Err(e) = &result {
                tracing::warn!(error = %e, elapsed_ms = elapsed.as_millis(), "API call failed");
            }
            result.map_err(DispatchError::from)
        }
        .instrument(span)
        .await
    }

    /// Reject queued and future calls. Calls already running finish normally.
    pub fn shutdown(&self) {
        if let Some(slots) = &self.slots {
            slots.close();
        }
    }

    async fn admit(&self) {
        if self.settings.max_per_second == 0 {
            return;
        }

        loop {
            let reopens_at = {
                let mut window = self.window.lock();
                let now = Instant::now();
                while window
                    .front()
                    .is_some_and(|admitted| now.duration_since(*admitted) >= WINDOW)
                {
                    window.pop_front();
                }

                if window.len() < self.settings.max_per_second {
                    window.push_back(now);
                    return;
                }
                window.front().map(|oldest| *oldest + WINDOW)
            };

            if let Some(at) = reopens_at {
                tracing::trace!("Rate window full, waiting");
                tokio::time::sleep_until(at).await;
            }
        }
    }

    async fn acquire_slot(&self) -> Result<Option<SemaphorePermit<'_>>, DispatchError> {
        let Some(slots) = &self.slots else {
            return Ok(None);
        };

        if let Ok(permit) = slots.try_acquire() {
            return Ok(Some(permit));
        }

        let waiting = Waiting::enter(&self.queued);
        let permit = slots.acquire().await;
        drop(waiting);

        permit.map(Some).map_err(|_| DispatchError::Closed)
    }
}

/// One caller counted in the queue until dropped, including when the
/// `dispatch` future is abandoned while waiting.
struct Waiting<'a> {
    queued: &'a AtomicUsize,
}

impl<'a> Waiting<'a> {
    fn enter(queued: &'a AtomicUsize) -> Self {
        let depth = queued.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::set_dispatcher_queued(depth);
        tracing::debug!(queued = depth, "Waiting for dispatcher slot");
        Self { queued }
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        let depth = self.queued.fetch_sub(1, Ordering::Relaxed) - 1;
        metrics::set_dispatcher_queued(depth);
    }
}

impl Default for RequestDispatcher {
    fn default() -> Self {
        Self::new(DispatcherSettings::default())
    }
}
