//! Helper thread pool.
//!
//! A fixed set of helpers spawned on first use. Each call installs a job
//! under the pool mutex, bumps a generation counter and wakes everyone;
//! helpers claim work items through one shared atomic counter until it runs
//! dry, then park again. The main thread participates as worker 0 and waits
//! for the remaining count to reach zero, which is also the point where
//! helper engine clones have merged their statistics back. The termination
//! flag is only ever checked at this barrier, never inside a kernel.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use polymult_engine::FftEngine;

/// Borrow-erased internal job. The pointer stays valid because the barrier
/// in `run_internal` outlives every helper's use of it.
struct RawJob<E: FftEngine>(*const (dyn Fn(usize, &E) + Sync));

unsafe impl<E: FftEngine> Send for RawJob<E> {}

impl<E: FftEngine> Clone for RawJob<E> {
    fn clone(&self) -> Self {
        RawJob(self.0)
    }
}

enum Job<E: FftEngine> {
    Internal(RawJob<E>),
    User(Arc<dyn Fn(usize, &E) + Send + Sync>),
}

impl<E: FftEngine> Clone for Job<E> {
    fn clone(&self) -> Self {
        match self {
            Job::Internal(raw) => Job::Internal(raw.clone()),
            Job::User(f) => Job::User(Arc::clone(f)),
        }
    }
}

struct State<E: FftEngine> {
    generation: u64,
    job: Option<Job<E>>,
    participants: usize,
    remaining: usize,
    terminating: bool,
}

struct Shared<E: FftEngine> {
    state: Mutex<State<E>>,
    work_ready: Condvar,
    work_done: Condvar,
    next_item: AtomicUsize,
}

/// Cloneable handle on the pool's shared work counter, for user callbacks
/// running on the helpers.
pub struct WorkCounter<E: FftEngine>(Arc<Shared<E>>);

impl<E: FftEngine> Clone for WorkCounter<E> {
    fn clone(&self) -> Self {
        WorkCounter(Arc::clone(&self.0))
    }
}

impl<E: FftEngine> WorkCounter<E> {
    /// Claim the next work item index of the current launch.
    #[must_use]
    pub fn next(&self) -> usize {
        self.0.next_item.fetch_add(1, Ordering::SeqCst)
    }
}

/// Pool of helper threads sharing one work counter.
pub(crate) struct HelperPool<E: FftEngine> {
    shared: Arc<Shared<E>>,
    threads: Vec<JoinHandle<()>>,
}

impl<E: FftEngine> HelperPool<E> {
    /// Spawn `helpers` threads, each owning a clone of `engine`.
    pub fn spawn(engine: &Arc<E>, helpers: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                generation: 0,
                job: None,
                participants: 0,
                remaining: 0,
                terminating: false,
            }),
            work_ready: Condvar::new(),
            work_done: Condvar::new(),
            next_item: AtomicUsize::new(0),
        });

        let threads = (1..=helpers)
            .map(|rank| {
                let shared = Arc::clone(&shared);
                let engine = Arc::clone(engine);
                std::thread::spawn(move || helper_main(&shared, &*engine, rank))
            })
            .collect();

        tracing::debug!(helpers, "helper pool spawned");
        Self { shared, threads }
    }

    /// Number of helper threads (the main thread comes on top).
    pub fn helpers(&self) -> usize {
        self.threads.len()
    }

    /// Claim the next work item index.
    pub fn next_item(&self) -> usize {
        self.shared.next_item.fetch_add(1, Ordering::SeqCst)
    }

    /// A counter handle user callbacks can carry into the helpers.
    pub fn work_counter(&self) -> WorkCounter<E> {
        WorkCounter(Arc::clone(&self.shared))
    }

    /// Run `job` on the main thread plus up to `helpers` pool helpers, and
    /// wait for all of them. The work counter is reset first; workers are
    /// expected to drain it via [`HelperPool::next_item`].
    pub fn run_internal<'a>(
        &self,
        parent: &E,
        helpers: usize,
        job: &'a (dyn Fn(usize, &E) + Sync + 'a),
    ) {
        // Erase the borrow; the wait below keeps `job` alive past every use.
        let raw: *const (dyn Fn(usize, &E) + Sync) = unsafe {
            std::mem::transmute::<
                *const (dyn Fn(usize, &E) + Sync + 'a),
                *const (dyn Fn(usize, &E) + Sync + 'static),
            >(job as *const _)
        };
        self.install(Job::Internal(RawJob(raw)), helpers);
        job(0, parent);
        self.wait();
    }

    /// Install a user callback and release the helpers without waiting.
    /// The caller claims its own share of work via [`HelperPool::next_item`]
    /// and then calls [`HelperPool::wait`].
    pub fn launch_user(&self, helpers: usize, f: Arc<dyn Fn(usize, &E) + Send + Sync>) {
        self.install(Job::User(f), helpers);
    }

    /// Wait for every participating helper of the current generation.
    pub fn wait(&self) {
        let mut st = self.shared.state.lock();
        while st.remaining > 0 {
            self.shared.work_done.wait(&mut st);
        }
        st.job = None;
    }

    fn install(&self, job: Job<E>, helpers: usize) {
        self.shared.next_item.store(0, Ordering::SeqCst);
        let mut st = self.shared.state.lock();
        debug_assert_eq!(st.remaining, 0, "pool launched while busy");
        st.generation += 1;
        st.participants = helpers.min(self.threads.len());
        st.remaining = st.participants;
        st.job = Some(job);
        drop(st);
        self.shared.work_ready.notify_all();
    }
}

impl<E: FftEngine> Drop for HelperPool<E> {
    fn drop(&mut self) {
        {
            let mut st = self.shared.state.lock();
            st.terminating = true;
        }
        self.shared.work_ready.notify_all();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

fn helper_main<E: FftEngine>(shared: &Shared<E>, parent: &E, rank: usize) {
    let clone = parent.helper_clone();
    parent.helper_started(rank);
    let mut seen = 0u64;
    loop {
        let job = {
            let mut st = shared.state.lock();
            loop {
                if st.terminating {
                    drop(st);
                    parent.absorb_stats(&clone);
                    parent.helper_stopped(rank);
                    return;
                }
                if st.generation != seen {
                    seen = st.generation;
                    if rank <= st.participants {
                        break;
                    }
                    // Not part of this generation; keep waiting.
                    continue;
                }
                shared.work_ready.wait(&mut st);
            }
            match st.job.clone() {
                Some(job) => job,
                None => continue,
            }
        };

        match &job {
            Job::Internal(raw) => {
                // The installer keeps the closure alive until the barrier.
                let f = unsafe { &*raw.0 };
                f(rank, &clone);
            }
            Job::User(f) => f(rank, &clone),
        }
        parent.absorb_stats(&clone);

        let mut st = shared.state.lock();
        st.remaining -= 1;
        if st.remaining == 0 {
            shared.work_done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polymult_engine::DwtEngine;
    use std::sync::atomic::AtomicU64;

    fn engine() -> Arc<DwtEngine> {
        Arc::new(DwtEngine::new(32, 8.0))
    }

    #[test]
    fn all_items_claimed_exactly_once() {
        let engine = engine();
        let pool = HelperPool::spawn(&engine, 3);
        let total = 1000usize;
        let claimed = AtomicU64::new(0);
        let sum = AtomicU64::new(0);

        pool.run_internal(&engine, 3, &|_worker, _eng| loop {
            let item = pool.next_item();
            if item >= total {
                break;
            }
            claimed.fetch_add(1, Ordering::Relaxed);
            sum.fetch_add(item as u64, Ordering::Relaxed);
        });

        assert_eq!(claimed.load(Ordering::Relaxed), total as u64);
        assert_eq!(
            sum.load(Ordering::Relaxed),
            (total as u64 - 1) * total as u64 / 2
        );
    }

    #[test]
    fn reusable_across_generations() {
        let engine = engine();
        let pool = HelperPool::spawn(&engine, 2);
        for round in 0..5usize {
            let count = AtomicU64::new(0);
            pool.run_internal(&engine, 2, &|_, _| loop {
                if pool.next_item() >= 10 * (round + 1) {
                    break;
                }
                count.fetch_add(1, Ordering::Relaxed);
            });
            assert_eq!(count.load(Ordering::Relaxed), 10 * (round as u64 + 1));
        }
    }

    #[test]
    fn zero_helpers_runs_on_main() {
        let engine = engine();
        let pool = HelperPool::spawn(&engine, 0);
        let count = AtomicU64::new(0);
        pool.run_internal(&engine, 4, &|worker, _| {
            assert_eq!(worker, 0);
            while pool.next_item() < 7 {
                count.fetch_add(1, Ordering::Relaxed);
            }
        });
        assert_eq!(count.load(Ordering::Relaxed), 7);
    }

    #[test]
    fn user_callback_launch_and_wait() {
        let engine = engine();
        let pool = HelperPool::spawn(&engine, 2);
        let hits = Arc::new(AtomicU64::new(0));
        let hits2 = Arc::clone(&hits);
        pool.launch_user(
            2,
            Arc::new(move |_worker, _eng: &DwtEngine| {
                hits2.fetch_add(1, Ordering::Relaxed);
            }),
        );
        pool.wait();
        assert_eq!(hits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn fewer_participants_than_helpers() {
        let engine = engine();
        let pool = HelperPool::spawn(&engine, 4);
        let workers_seen = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&workers_seen);
        pool.run_internal(&engine, 1, &|worker, _| {
            seen.lock().push(worker);
            while pool.next_item() < 4 {}
        });
        let seen = workers_seen.lock();
        // Main plus exactly one helper.
        assert!(seen.len() == 2);
        assert!(seen.contains(&0));
    }
}
