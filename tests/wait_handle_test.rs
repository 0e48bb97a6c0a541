/*!
 * Wait Handle Awaiter Integration Tests
 *
 * Awaiting waitable kernel objects with and without timeouts
 */

use os_await::{
    duplicate_handle, AwaitError, Awaitable, ChildProcess, Event, PoolConfig, ProcessOptions,
    WaitHandleAwaiter, WaitPool, Waitable, WaitableExt,
};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pool() -> WaitPool {
    WaitPool::new(PoolConfig::minimal()).unwrap()
}

#[tokio::test]
async fn test_await_signaled_from_task() {
    let pool = pool();
    let event = Arc::new(Event::new(false).unwrap());
    let setter = event.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        setter.set().unwrap();
    });

    let signaled = WaitHandleAwaiter::with_pool(event, Some(Duration::from_secs(5)), pool.clone()).await;
    assert_eq!(signaled, Ok(true));
    pool.shutdown();
}

#[tokio::test]
async fn test_await_times_out() {
    let pool = pool();
    let event = Arc::new(Event::new(false).unwrap());

    let start = Instant::now();
    let signaled = WaitHandleAwaiter::with_pool(event, Some(Duration::from_millis(60)), pool.clone()).await;

    assert_eq!(signaled, Ok(false));
    assert!(start.elapsed() >= Duration::from_millis(60));
    pool.shutdown();
}

#[tokio::test]
async fn test_zero_timeout_on_unsignaled_handle() {
    let pool = pool();
    let event = Arc::new(Event::new(false).unwrap());

    let signaled = WaitHandleAwaiter::with_pool(event, Some(Duration::ZERO), pool.clone()).await;
    assert_eq!(signaled, Ok(false));
    pool.shutdown();
}

#[tokio::test]
async fn test_already_signaled_skips_pool() {
    let pool = pool();
    pool.shutdown();
    let event = Arc::new(Event::new(true).unwrap());

    // Completes through is_complete, so a stopped pool is never touched
    let signaled = WaitHandleAwaiter::with_pool(event, None, pool).await;
    assert_eq!(signaled, Ok(true));
}

#[tokio::test]
async fn test_stopped_pool_surfaces_error() {
    let pool = pool();
    pool.shutdown();
    let event = Arc::new(Event::new(false).unwrap());

    let result = WaitHandleAwaiter::with_pool(event, None, pool).await;
    assert_eq!(result, Err(AwaitError::PoolShutdown));
}

#[tokio::test]
async fn test_wait_async_extension() {
    let event = Arc::new(Event::new(false).unwrap());
    assert_eq!(
        event.wait_async_timeout(Duration::from_millis(20)).await,
        Ok(false)
    );

    event.set().unwrap();
    assert_eq!(event.wait_async().await, Ok(true));
}

#[tokio::test]
async fn test_await_duplicated_process_handle() {
    let pool = pool();
    let process = ChildProcess::spawn_with(
        Command::new("sh").args(["-c", "sleep 0.05"]),
        ProcessOptions::default().with_pool(pool.clone()),
    )
    .unwrap();

    let handle: Arc<dyn Waitable> = Arc::new(process.create_wait_handle(false).unwrap());
    let exited = WaitHandleAwaiter::with_pool(handle, Some(Duration::from_secs(5)), pool.clone()).await;

    assert_eq!(exited, Ok(true));
    assert_eq!(process.exit_code(), Some(0));
    pool.shutdown();
}

#[test]
fn test_duplicate_observes_original_event() {
    let event = Event::new(false).unwrap();
    let dup = Arc::new(duplicate_handle(&event, false).unwrap());

    let pool = pool();
    let awaiter = WaitHandleAwaiter::with_pool(dup, Some(Duration::from_secs(5)), pool.clone());
    assert!(!awaiter.is_complete());

    event.set().unwrap();
    assert!(awaiter.is_complete());
    assert!(awaiter.get_result());
    pool.shutdown();
}

#[tokio::test]
async fn test_abandoned_futures_release_registrations() {
    let pool = pool();
    let event = Arc::new(Event::new(false).unwrap());

    for _ in 0..50 {
        let awaiter = WaitHandleAwaiter::with_pool(event.clone(), None, pool.clone());
        let outcome = tokio::time::timeout(Duration::from_millis(1), awaiter).await;
        assert!(outcome.is_err());
    }

    assert_eq!(pool.pending(), 0);
    pool.shutdown();
}
