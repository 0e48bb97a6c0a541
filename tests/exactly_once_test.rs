/*!
 * Exactly-Once Property Tests
 *
 * However completions, registrations, and native callbacks interleave, a
 * registered continuation runs once and the first recorded result sticks.
 */

use os_await::{Awaitable, Completion, CompletionState, Event, PoolConfig, WaitHandleAwaiter, WaitPool};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn completion_fires_once_for_any_racer_count(
        racers in 1usize..12,
        register_first in any::<bool>(),
    ) {
        let completion = Arc::new(Completion::new());
        let count = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(racers + 1));

        let register = {
            let count = count.clone();
            let completion = completion.clone();
            move || {
                completion.on_completed(Box::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }))
            }
        };

        let mut register = Some(register);
        if register_first {
            prop_assert!((register.take().unwrap())());
        }

        let handles: Vec<_> = (0..racers)
            .map(|i| {
                let completion = completion.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    completion.complete(i)
                })
            })
            .collect();

        barrier.wait();
        if let Some(register) = register.take() {
            prop_assert!(register());
        }

        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().ok())
            .filter(|won| *won)
            .count();

        prop_assert_eq!(winners, 1);
        prop_assert_eq!(count.load(Ordering::SeqCst), 1);
        prop_assert_eq!(completion.state(), CompletionState::Fired);
        prop_assert!(completion.value().is_some_and(|v| *v < racers));
    }

    #[test]
    fn wait_awaiter_fires_once_when_signal_races_timeout(timeout_ms in 0u64..4) {
        let pool = WaitPool::new(PoolConfig::minimal()).unwrap();
        let event = Arc::new(Event::new(false).unwrap());
        let awaiter = WaitHandleAwaiter::with_pool(
            event.clone(),
            Some(Duration::from_millis(timeout_ms)),
            pool.clone(),
        );
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = flume::unbounded();

        let c = count.clone();
        awaiter
            .on_completed(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(());
            }))
            .unwrap();
        event.set().unwrap();

        prop_assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        thread::sleep(Duration::from_millis(10));

        prop_assert_eq!(count.load(Ordering::SeqCst), 1);
        prop_assert!(awaiter.try_get_result().is_ok());
        pool.shutdown();
    }
}
