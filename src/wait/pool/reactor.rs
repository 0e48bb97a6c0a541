/*!
 * Wait Reactor
 *
 * Single thread blocked in epoll_wait on every registered handle plus an
 * eventfd waker. Readiness fires a registration with `timed_out = false`;
 * an expired deadline fires it with `timed_out = true`. Callbacks are
 * shipped to the worker channel, never run on the reactor thread.
 *
 * # Design
 *
 * - Each registration owns a private duplicate of the caller's descriptor,
 *   so the same kernel object can be registered any number of times
 * - Handles are armed EPOLLONESHOT; once-mode entries are removed from the
 *   table before dispatch, which makes firing single-shot even when
 *   readiness and deadline expire in the same iteration
 * - Deadlines live in a min-heap tagged with the entry generation; stale
 *   heap entries are skipped when popped
 * - Waits that end before their deadline leave a stale heap entry; the
 *   reactor rebuilds the heap once stale entries outnumber live ones
 */

use super::WaitCallback;
use crate::core::errors::AwaitResult;
use crate::core::types::{deadline_after, Job, RegistrationId};
use crate::wait::handle::{native_timeout, Waitable};
use ahash::RandomState;
use dashmap::DashMap;
use nix::errno::Errno;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use nix::sys::eventfd::{EfdFlags, EventFd};
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Epoll token reserved for the waker eventfd
const WAKER_TOKEN: u64 = u64::MAX;

/// Heap size below which stale deadlines are left to expire
pub(super) const COMPACT_MIN_DEADLINES: usize = 64;

#[inline]
fn interest() -> EpollFlags {
    EpollFlags::EPOLLIN | EpollFlags::EPOLLONESHOT
}

/// Live registration
pub(super) struct Entry {
    fd: OwnedFd,
    _handle: Arc<dyn Waitable>,
    callback: WaitCallback,
    timeout: Option<Duration>,
    once: bool,
    generation: u64,
}

impl Entry {
    pub(super) fn new(
        fd: OwnedFd,
        handle: Arc<dyn Waitable>,
        callback: WaitCallback,
        timeout: Option<Duration>,
        once: bool,
    ) -> Self {
        Self {
            fd,
            _handle: handle,
            callback,
            timeout,
            once,
            generation: 0,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Deadline {
    at: Instant,
    id: RegistrationId,
    generation: u64,
}

pub(super) struct Reactor {
    epoll: Epoll,
    waker: EventFd,
    entries: DashMap<RegistrationId, Entry, RandomState>,
    deadlines: Mutex<BinaryHeap<Reverse<Deadline>>>,
    jobs: Mutex<Option<flume::Sender<Job>>>,
    shutdown: AtomicBool,
    max_events: usize,
}

impl Reactor {
    pub(super) fn new(max_events: usize, jobs: flume::Sender<Job>) -> AwaitResult<Self> {
        let epoll = Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?;
        let waker = EventFd::from_value_and_flags(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)?;
        epoll.add(&waker, EpollEvent::new(EpollFlags::EPOLLIN, WAKER_TOKEN))?;

        Ok(Self {
            epoll,
            waker,
            entries: DashMap::with_hasher(RandomState::new()),
            deadlines: Mutex::new(BinaryHeap::new()),
            jobs: Mutex::new(Some(jobs)),
            shutdown: AtomicBool::new(false),
            max_events,
        })
    }

    /// Add and arm a registration
    pub(super) fn insert(&self, id: RegistrationId, entry: Entry) -> AwaitResult<()> {
        let deadline = deadline_after(Instant::now(), entry.timeout);
        self.entries.insert(id, entry);

        // The entry must be in the table before the kernel can report it
        let armed = match self.entries.get(&id) {
            Some(entry) => self.epoll.add(&entry.fd, EpollEvent::new(interest(), id)),
            None => Ok(()),
        };
        if let Err(e) = armed {
            self.entries.remove(&id);
            return Err(e.into());
        }

        if let Some(at) = deadline {
            self.deadlines.lock().push(Reverse(Deadline {
                at,
                id,
                generation: 0,
            }));
        }
        self.wake();
        Ok(())
    }

    /// Cancel a registration; `true` if it had not fired (once-mode) or was
    /// still live (repeat mode)
    pub(super) fn remove(&self, id: RegistrationId) -> bool {
        match self.entries.remove(&id) {
            Some((_, entry)) => {
                let _ = self.epoll.delete(&entry.fd);
                if entry.timeout.is_some() {
                    // Lets the reactor compact the deadline left behind
                    self.wake();
                }
                true
            }
            None => false,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Deadlines in the heap, stale ones included
    pub(super) fn deadline_count(&self) -> usize {
        self.deadlines.lock().len()
    }

    pub(super) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(super) fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake();
    }

    fn wake(&self) {
        if let Err(e) = self.waker.write(1) {
            if e != Errno::EAGAIN {
                warn!(error = %e, "failed to wake wait reactor");
            }
        }
    }

    /// Reactor loop, runs until shutdown
    pub(super) fn run(&self) {
        let mut events = vec![EpollEvent::empty(); self.max_events];
        debug!(max_events = self.max_events, "wait reactor started");

        while !self.is_shutdown() {
            let timeout = self.next_timeout();
            let ready = match self.epoll.wait(&mut events, native_timeout(timeout)) {
                Ok(n) => n,
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    error!(error = %e, "epoll_wait failed, stopping wait reactor");
                    break;
                }
            };

            for event in &events[..ready] {
                match event.data() {
                    WAKER_TOKEN => {
                        let _ = self.waker.read();
                    }
                    id => self.fire(id, false, None),
                }
            }

            self.expire(Instant::now());
            self.compact_deadlines();
        }

        self.drain();
    }

    fn next_timeout(&self) -> Option<Duration> {
        self.deadlines
            .lock()
            .peek()
            .map(|Reverse(d)| d.at.saturating_duration_since(Instant::now()))
    }

    fn expire(&self, now: Instant) {
        loop {
            let due = {
                let mut heap = self.deadlines.lock();
                if matches!(heap.peek(), Some(Reverse(d)) if d.at <= now) {
                    heap.pop().map(|Reverse(d)| d)
                } else {
                    None
                }
            };
            match due {
                Some(d) => self.fire(d.id, true, Some(d.generation)),
                None => break,
            }
        }
    }

    fn is_live(&self, deadline: &Deadline) -> bool {
        self.entries
            .get(&deadline.id)
            .is_some_and(|entry| entry.generation == deadline.generation)
    }

    /// Drop heap entries whose registration ended or re-armed
    ///
    /// Reactor thread only: the heap is briefly taken out of the lock, and
    /// only this thread reads it for the next timeout.
    fn compact_deadlines(&self) {
        let live = self.entries.len();
        let stale = {
            let mut heap = self.deadlines.lock();
            if heap.len() <= COMPACT_MIN_DEADLINES.max(live.saturating_mul(2)) {
                return;
            }
            std::mem::take(&mut *heap)
        };

        let before = stale.len();
        let kept: Vec<_> = stale
            .into_vec()
            .into_iter()
            .filter(|Reverse(deadline)| self.is_live(deadline))
            .collect();

        let mut heap = self.deadlines.lock();
        heap.extend(kept);
        debug!(before, after = heap.len(), "compacted wait deadlines");
    }

    /// Fire one registration
    ///
    /// `generation` is set for deadline expiry and must match the entry;
    /// readiness fires any generation.
    fn fire(&self, id: RegistrationId, timed_out: bool, generation: Option<u64>) {
        let current = |entry: &Entry| generation.map_or(true, |g| g == entry.generation);

        let once = match self.entries.get(&id) {
            Some(entry) if current(entry.value()) => entry.once,
            _ => return,
        };

        if once {
            // Removal is the single-fire point: only one caller gets the entry
            let Some((_, entry)) = self.entries.remove_if(&id, |_, e| current(e)) else {
                return;
            };
            let _ = self.epoll.delete(&entry.fd);
            trace!(registration = id, timed_out, "wait fired");
            self.dispatch(entry.callback.clone(), timed_out);
            return;
        }

        let callback = {
            let Some(mut entry) = self.entries.get_mut(&id) else {
                return;
            };
            if !current(entry.value()) {
                return;
            }
            entry.generation += 1;
            let mut rearm = EpollEvent::new(interest(), id);
            if let Err(e) = self.epoll.modify(&entry.fd, &mut rearm) {
                warn!(registration = id, error = %e, "failed to re-arm repeating wait");
            }
            if let Some(at) = deadline_after(Instant::now(), entry.timeout) {
                self.deadlines.lock().push(Reverse(Deadline {
                    at,
                    id,
                    generation: entry.generation,
                }));
            }
            entry.callback.clone()
        };
        trace!(registration = id, timed_out, "repeating wait fired");
        self.dispatch(callback, timed_out);
    }

    fn dispatch(&self, callback: WaitCallback, timed_out: bool) {
        let job: Job = Box::new(move || callback(timed_out));
        let sender = self.jobs.lock().clone();
        match sender {
            Some(tx) => {
                if tx.send(job).is_err() {
                    warn!("wait workers gone, dropping callback");
                }
            }
            None => warn!("wait pool stopped, dropping callback"),
        }
    }

    fn drain(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        self.deadlines.lock().clear();
        self.jobs.lock().take();
        debug!(dropped, "wait reactor stopped");
    }
}
