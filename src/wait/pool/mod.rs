/*!
 * Wait Pool
 *
 * Pooled wait registration: invoke a callback when a waitable object is
 * signaled or a timeout elapses, without a blocked thread per wait.
 *
 * # Architecture
 *
 * - One reactor thread (epoll) watches every registration
 * - A small worker pool runs callbacks, fed through a flume channel
 * - Callback panics are caught and logged; the worker keeps running
 * - Dropping the last `WaitPool` clone stops the reactor and its workers
 *
 * # Examples
 *
 * ```no_run
 * use os_await::wait::{Event, WaitPool};
 * use std::sync::Arc;
 * use std::time::Duration;
 *
 * let pool = WaitPool::global()?;
 * let event = Arc::new(Event::new(false)?);
 * let registration = pool.register_wait(
 *     event.clone(),
 *     |timed_out| println!("fired, timed out: {timed_out}"),
 *     Some(Duration::from_secs(1)),
 *     true,
 * )?;
 * event.set()?;
 * # let _ = registration;
 * # Ok::<(), os_await::AwaitError>(())
 * ```
 */

mod config;
mod reactor;

pub use config::{PoolConfig, ENV_MAX_EVENTS, ENV_WORKERS};

use crate::core::errors::{AwaitError, AwaitResult};
use crate::core::types::{panic_message, Job, RegistrationId};
use crate::wait::handle::Waitable;
use reactor::{Entry, Reactor};
use std::os::fd::AsFd;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Callback invoked with `timed_out`
pub type WaitCallback = Arc<dyn Fn(bool) + Send + Sync + 'static>;

static GLOBAL: OnceLock<WaitPool> = OnceLock::new();

struct Shared {
    reactor: Reactor,
    next_id: AtomicU64,
    config: PoolConfig,
}

/// Owner of a running pool; the reactor thread only holds `Shared`
struct PoolOwner {
    shared: Arc<Shared>,
}

impl Drop for PoolOwner {
    fn drop(&mut self) {
        if !self.shared.reactor.is_shutdown() {
            debug!("last wait pool handle dropped, stopping reactor");
            self.shared.reactor.shutdown();
        }
    }
}

/// Handle to a running wait pool (cheap to clone)
#[derive(Clone)]
pub struct WaitPool {
    owner: Arc<PoolOwner>,
}

impl WaitPool {
    /// Start a pool: one reactor thread plus `config.workers` workers
    pub fn new(config: PoolConfig) -> AwaitResult<Self> {
        let config = config.normalized();
        let (tx, rx) = flume::unbounded::<Job>();

        let shared = Arc::new(Shared {
            reactor: Reactor::new(config.max_events, tx)?,
            next_id: AtomicU64::new(1),
            config,
        });

        for index in 0..shared.config.workers {
            let rx = rx.clone();
            thread::Builder::new()
                .name(format!("{}-{}", shared.config.worker_thread_name, index))
                .spawn(move || run_worker(rx))?;
        }

        let reactor_shared = shared.clone();
        thread::Builder::new()
            .name(shared.config.reactor_thread_name.clone())
            .spawn(move || reactor_shared.reactor.run())?;

        info!(
            workers = shared.config.workers,
            max_events = shared.config.max_events,
            "wait pool started"
        );
        Ok(Self {
            owner: Arc::new(PoolOwner { shared }),
        })
    }

    #[inline]
    fn shared(&self) -> &Arc<Shared> {
        &self.owner.shared
    }

    /// Process-wide pool, created on first use from [`PoolConfig::from_env`]
    pub fn global() -> AwaitResult<&'static WaitPool> {
        if let Some(pool) = GLOBAL.get() {
            return Ok(pool);
        }
        let pool = WaitPool::new(PoolConfig::from_env())?;
        let winner = GLOBAL.get_or_init(|| pool.clone());
        if !Arc::ptr_eq(&winner.owner, &pool.owner) {
            pool.shutdown();
        }
        Ok(winner)
    }

    /// Register a callback for `handle`
    ///
    /// The callback receives `true` when `timeout` elapsed first (`None`
    /// waits forever). With `execute_only_once` the registration is spent
    /// after one firing; otherwise it re-arms and its timeout restarts.
    /// Callbacks run on pool worker threads, never inside this call.
    pub fn register_wait<F>(
        &self,
        handle: Arc<dyn Waitable>,
        callback: F,
        timeout: Option<Duration>,
        execute_only_once: bool,
    ) -> AwaitResult<RegisteredWait>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if self.shared().reactor.is_shutdown() {
            return Err(AwaitError::PoolShutdown);
        }

        let id = self.shared().next_id.fetch_add(1, Ordering::Relaxed);
        let fd = handle.as_fd().try_clone_to_owned()?;
        let entry = Entry::new(fd, handle, Arc::new(callback), timeout, execute_only_once);
        self.shared().reactor.insert(id, entry)?;

        debug!(registration = id, ?timeout, once = execute_only_once, "registered wait");
        Ok(RegisteredWait {
            id,
            shared: Arc::downgrade(self.shared()),
        })
    }

    /// Number of live registrations
    pub fn pending(&self) -> usize {
        self.shared().reactor.len()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared().config
    }

    /// Stop the reactor
    ///
    /// Pending registrations are dropped without firing; workers exit once
    /// queued callbacks have run. Does not block.
    pub fn shutdown(&self) {
        self.shared().reactor.shutdown();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared().reactor.is_shutdown()
    }
}

impl std::fmt::Debug for WaitPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitPool")
            .field("config", &self.shared().config)
            .field("pending", &self.pending())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Token for a pooled wait registration
#[derive(Debug)]
pub struct RegisteredWait {
    id: RegistrationId,
    shared: Weak<Shared>,
}

impl RegisteredWait {
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Cancel the registration
    ///
    /// Returns `true` if it was still registered, i.e. a once-mode wait had
    /// not fired yet. Dropping the token does not unregister.
    pub fn unregister(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => {
                let removed = shared.reactor.remove(self.id);
                debug!(registration = self.id, removed, "unregistered wait");
                removed
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").field("config", &self.config).finish()
    }
}

fn run_worker(jobs: flume::Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
            warn!(panic = %panic_message(panic.as_ref()), "wait callback panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wait::Event;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn pool() -> WaitPool {
        WaitPool::new(PoolConfig::minimal()).unwrap()
    }

    fn channel_callback() -> (flume::Receiver<bool>, impl Fn(bool) + Send + Sync + 'static) {
        let (tx, rx) = flume::unbounded();
        (rx, move |timed_out| {
            let _ = tx.send(timed_out);
        })
    }

    #[test]
    fn test_signal_fires_callback() {
        let pool = pool();
        let event = Arc::new(Event::new(false).unwrap());
        let (rx, callback) = channel_callback();

        pool.register_wait(event.clone(), callback, None, true).unwrap();
        assert_eq!(pool.pending(), 1);

        event.set().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(false));
        assert_eq!(pool.pending(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_timeout_fires_callback() {
        let pool = pool();
        let event = Arc::new(Event::new(false).unwrap());
        let (rx, callback) = channel_callback();

        let start = Instant::now();
        pool.register_wait(event, callback, Some(Duration::from_millis(40)), true)
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(true));
        assert!(start.elapsed() >= Duration::from_millis(40));
        pool.shutdown();
    }

    #[test]
    fn test_unregister_before_fire() {
        let pool = pool();
        let event = Arc::new(Event::new(false).unwrap());
        let (rx, callback) = channel_callback();

        let registration = pool.register_wait(event.clone(), callback, None, true).unwrap();
        assert!(registration.unregister());
        assert!(!registration.unregister());

        event.set().unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        pool.shutdown();
    }

    #[test]
    fn test_same_handle_registered_twice() {
        let pool = pool();
        let event = Arc::new(Event::new(false).unwrap());
        let (rx, callback) = channel_callback();
        let (rx2, callback2) = channel_callback();

        pool.register_wait(event.clone(), callback, None, true).unwrap();
        pool.register_wait(event.clone(), callback2, None, true).unwrap();

        event.set().unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(false));
        assert_eq!(rx2.recv_timeout(Duration::from_secs(2)), Ok(false));
        pool.shutdown();
    }

    #[test]
    fn test_repeat_mode_rearms() {
        let pool = pool();
        let event = Arc::new(Event::new(false).unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let registration = pool
            .register_wait(
                event,
                move |timed_out| {
                    assert!(timed_out);
                    count_clone.fetch_add(1, Ordering::SeqCst);
                },
                Some(Duration::from_millis(10)),
                false,
            )
            .unwrap();

        thread::sleep(Duration::from_millis(150));
        assert!(registration.unregister());
        assert!(count.load(Ordering::SeqCst) >= 2);
        pool.shutdown();
    }

    #[test]
    fn test_panicking_callback_keeps_worker() {
        let pool = pool();
        let first = Arc::new(Event::new(true).unwrap());
        let second = Arc::new(Event::new(true).unwrap());
        let (rx, callback) = channel_callback();

        pool.register_wait(first, |_| panic!("boom"), None, true).unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.register_wait(second, callback, None, true).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(false));
        pool.shutdown();
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_signaled_waits_do_not_keep_deadlines() {
        let pool = pool();
        let event = Arc::new(Event::new(true).unwrap());
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..600 {
            let fired = fired.clone();
            pool.register_wait(
                event.clone(),
                move |_| {
                    fired.fetch_add(1, Ordering::SeqCst);
                },
                Some(Duration::from_secs(3600)),
                true,
            )
            .unwrap();
        }

        assert!(wait_for(|| fired.load(Ordering::SeqCst) == 600));
        assert_eq!(pool.pending(), 0);
        assert!(wait_for(|| pool.shared().reactor.deadline_count() <= reactor::COMPACT_MIN_DEADLINES));
        pool.shutdown();
    }

    #[test]
    fn test_unregistered_waits_do_not_keep_deadlines() {
        let pool = pool();
        let event = Arc::new(Event::new(false).unwrap());

        let registrations: Vec<_> = (0..500)
            .map(|_| {
                pool.register_wait(event.clone(), |_| {}, Some(Duration::from_secs(3600)), true)
                    .unwrap()
            })
            .collect();
        let live = pool
            .register_wait(event.clone(), |_| {}, Some(Duration::from_secs(3600)), true)
            .unwrap();

        for registration in &registrations {
            assert!(registration.unregister());
        }

        assert!(wait_for(|| pool.shared().reactor.deadline_count() <= reactor::COMPACT_MIN_DEADLINES));
        assert_eq!(pool.pending(), 1);
        assert!(live.unregister());
        pool.shutdown();
    }

    #[test]
    fn test_live_deadline_survives_compaction() {
        let pool = pool();
        let idle = Arc::new(Event::new(false).unwrap());
        let (rx, callback) = channel_callback();

        pool.register_wait(idle.clone(), callback, Some(Duration::from_millis(300)), true)
            .unwrap();
        let signaled = Arc::new(Event::new(true).unwrap());
        for _ in 0..200 {
            pool.register_wait(signaled.clone(), |_| {}, Some(Duration::from_secs(3600)), true)
                .unwrap();
        }

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(true));
        pool.shutdown();
    }

    #[test]
    fn test_register_after_shutdown() {
        let pool = pool();
        pool.shutdown();
        let event = Arc::new(Event::new(false).unwrap());

        let result = pool.register_wait(event, |_| {}, None, true);
        assert!(matches!(result, Err(AwaitError::PoolShutdown)));
    }
}
