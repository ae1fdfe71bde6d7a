use std::cell::Cell;
use std::io;
use std::mem;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_deque::{Injector, Steal, Stealer, Worker};

use super::latch::{CountLatch, Latch, LockLatch};
use super::system::PanicHandler;
use super::unwind::{self, AbortIfPanic};

/// A named unit of work.
pub struct Job {
    name: String,
    func: Box<dyn FnOnce() + Send>,
}

thread_local! {
    // Address of the scheduler that owns the current worker thread, or zero.
    static CURRENT: Cell<usize> = Cell::new(0);
}

pub struct Scheduler {
    terminator: CountLatch,
    watcher: Watcher,
    threads: Vec<ThreadInfo>,
    injector: Injector<Job>,
    panic_handler: Option<Box<PanicHandler>>,
}

struct ThreadInfo {
    primed: LockLatch,
    terminated: LockLatch,
    stealer: Stealer<Job>,
}

impl Scheduler {
    pub fn new(
        num: u32,
        stack_size: Option<usize>,
        panic_handler: Option<Box<PanicHandler>>,
    ) -> io::Result<Arc<Self>> {
        let num = num.max(1) as usize;
        let workers: Vec<Worker<Job>> = (0..num).map(|_| Worker::new_fifo()).collect();

        let threads = workers
            .iter()
            .map(|v| ThreadInfo {
                stealer: v.stealer(),
                primed: LockLatch::new(),
                terminated: LockLatch::new(),
            })
            .collect();

        let scheduler = Arc::new(Scheduler {
            threads,
            injector: Injector::new(),
            panic_handler,
            terminator: CountLatch::new(),
            watcher: Watcher(Mutex::new(()), Condvar::new()),
        });

        for (i, w) in workers.into_iter().enumerate() {
            let sc = scheduler.clone();
            let mut b = thread::Builder::new().name(format!("larder-worker-{}", i));

            if let Some(stack_size) = stack_size {
                b = b.stack_size(stack_size);
            }

            if let Err(err) = b.spawn(move || Scheduler::main_loop(sc, i, w)) {
                // Lets the threads that did start wind down before reporting.
                for v in &scheduler.threads[i..] {
                    v.primed.set();
                    v.terminated.set();
                }

                scheduler.terminate_dec();
                scheduler.wait_until_terminated();
                return Err(err);
            }
        }

        for v in &scheduler.threads {
            v.primed.wait();
        }

        Ok(scheduler)
    }

    /// Push a job into the "external jobs" queue; it will be taken by whatever
    /// worker has nothing to do.
    pub fn inject(&self, name: String, func: Box<dyn FnOnce() + Send>) {
        // Ensure that scheduler cannot terminate until this job has executed. This
        // ref is decremented in `execute`.
        self.terminate_inc();
        self.injector.push(Job { name, func });
        self.watcher.notify_one();
    }

    /// Returns true if the current thread is one of the workers of this scheduler.
    pub fn is_worker_thread(&self) -> bool {
        let addr = self as *const Scheduler as usize;
        CURRENT.with(|v| v.get() == addr)
    }

    /// Handles panic.
    pub fn handle_panic(&self, name: &str, err: Box<dyn ::std::any::Any + Send>) {
        match self.panic_handler {
            Some(ref handler) => {
                // If the customizable panic handler itself panics,
                // then we abort.
                let abort_guard = AbortIfPanic;
                handler(err);
                mem::forget(abort_guard);
            }
            None => {
                error!(
                    "Task '{}' panicked: {}.",
                    name,
                    unwind::panic_message(err.as_ref())
                );
            }
        }
    }

    #[inline]
    pub fn terminate_dec(&self) {
        self.terminator.set();
        self.watcher.notify_all();
    }

    #[inline]
    pub fn terminate_inc(&self) {
        self.terminator.increment();
    }

    /// Blocks current thread until all the workers finished their jobs gracefully.
    pub fn wait_until_terminated(&self) {
        for v in &self.threads {
            self.watcher.notify_all();
            v.terminated.wait();
        }
    }

    fn execute(&self, job: Job) {
        trace!("Executes task '{}'.", job.name);

        let Job { name, func } = job;
        if let Err(err) = unwind::halt_unwinding(func) {
            self.handle_panic(&name, err);
        }

        self.terminate_dec();
    }

    fn main_loop(scheduler: Arc<Scheduler>, index: usize, worker: Worker<Job>) {
        CURRENT.with(|v| v.set(&*scheduler as *const Scheduler as usize));

        let worker_thread = WorkerThread {
            scheduler,
            index,
            worker,
        };

        worker_thread.scheduler.threads[index].primed.set();
        worker_thread.wait_until(&worker_thread.scheduler.terminator);
        worker_thread.scheduler.threads[index].terminated.set();

        CURRENT.with(|v| v.set(0));
    }
}

struct Watcher(Mutex<()>, Condvar);

impl Watcher {
    #[inline]
    fn wait_timeout(&self, ms: u64) {
        let duration = Duration::from_millis(ms);
        let v = match self.0.lock() {
            Ok(v) => v,
            Err(poisoned) => poisoned.into_inner(),
        };

        let _ = self.1.wait_timeout(v, duration);
    }

    #[inline]
    fn notify_one(&self) {
        self.1.notify_one()
    }

    #[inline]
    fn notify_all(&self) {
        self.1.notify_all()
    }
}

struct WorkerThread {
    scheduler: Arc<Scheduler>,
    index: usize,
    worker: Worker<Job>,
}

impl WorkerThread {
    /// Keep busy by popping and stealing jobs until `latch` is set. Sleeps with an
    /// exponential backoff when there is nothing to do.
    fn wait_until<L: Latch>(&self, latch: &L) {
        let mut ms = 1;
        while !latch.is_set() {
            if let Some(job) = self.find_work() {
                self.scheduler.execute(job);
                ms = 1;
            } else {
                self.scheduler.watcher.wait_timeout(ms);
                ms = (ms * 2).min(48);
            }
        }
    }

    fn find_work(&self) -> Option<Job> {
        self.worker
            .pop()
            .or_else(|| self.steal_injected())
            .or_else(|| self.steal_siblings())
    }

    fn steal_injected(&self) -> Option<Job> {
        loop {
            match self.scheduler.injector.steal_batch_and_pop(&self.worker) {
                Steal::Success(job) => return Some(job),
                Steal::Empty => return None,
                Steal::Retry => {}
            }
        }
    }

    fn steal_siblings(&self) -> Option<Job> {
        let threads = &self.scheduler.threads;
        let num = threads.len();

        (1..num)
            .map(|offset| (self.index + offset) % num)
            .filter_map(|victim| loop {
                match threads[victim].stealer.steal() {
                    Steal::Success(job) => return Some(job),
                    Steal::Empty => return None,
                    Steal::Retry => {}
                }
            })
            .next()
    }
}
