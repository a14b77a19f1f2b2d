//! Request Dispatcher Integration Tests
//!
//! Concurrency and rate limits under load, on paused Tokio time.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use flattrade_stream::{ApiError, DispatchError, DispatcherSettings, RequestDispatcher};

#[tokio::test(start_paused = true)]
async fn concurrency_and_rate_limits_hold_under_load() {
    let dispatcher = Arc::new(RequestDispatcher::new(DispatcherSettings {
        max_concurrent: 3,
        max_per_second: 5,
    }));
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(Mutex::new(Vec::new()));
    let origin = Instant::now();

    let mut handles = Vec::new();
    for i in 0..10 {
        let dispatcher = Arc::clone(&dispatcher);
        let in_flight = Arc::clone(&in_flight);
        let peak = Arc::clone(&peak);
        let starts = Arc::clone(&starts);

        handles.push(tokio::spawn(async move {
            dispatcher
                .dispatch("Test", move || async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    starts.lock().push(Instant::now() - origin);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ApiError>(i)
                })
                .await
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }
    results.sort_unstable();
    assert_eq!(results, (0..10).collect::<Vec<_>>());

    assert!(peak.load(Ordering::SeqCst) <= 3);

    let mut starts = starts.lock().clone();
    starts.sort();
    assert_eq!(starts.len(), 10);
    for (i, first) in starts.iter().enumerate() {
        let in_window = starts[i..]
            .iter()
            .take_while(|s| **s < *first + Duration::from_secs(1))
            .count();
        assert!(in_window <= 5, "{in_window} starts within 1s of {first:?}");
    }
    assert!(starts[9] >= Duration::from_secs(1));
    assert_eq!(dispatcher.queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_rejects_queued_calls() {
    let dispatcher = Arc::new(RequestDispatcher::new(DispatcherSettings {
        max_concurrent: 1,
        max_per_second: 0,
    }));

    let busy = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .dispatch("Test", || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, ApiError>(())
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let queued = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move {
            dispatcher
                .dispatch("Test", || async { Ok::<_, ApiError>(()) })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(dispatcher.queued(), 1);

    dispatcher.shutdown();

    assert_eq!(queued.await.unwrap(), Err(DispatchError::Closed));
    assert!(busy.await.unwrap().is_ok());
}
