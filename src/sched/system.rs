use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::scheduler::Scheduler;
use super::Dispatcher;

/// The type for a panic handling closure. Note that this same closure
/// may be invoked multiple times in parallel.
pub type PanicHandler = dyn Fn(Box<dyn ::std::any::Any + Send>) + Send + Sync;

/// Setup parameters of the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedParams {
    /// The number of worker threads. Zero is treated as one.
    pub num: u32,
    /// The stack size of each worker thread, in bytes.
    pub stack_size: Option<usize>,
}

impl Default for SchedParams {
    fn default() -> Self {
        SchedParams {
            num: 4,
            stack_size: None,
        }
    }
}

/// A pool of worker threads that executes named tasks in submission order, with
/// work stealing between idle workers.
pub struct SchedulerSystem {
    scheduler: Option<Arc<Scheduler>>,
    terminated: AtomicBool,
}

impl SchedulerSystem {
    pub fn new(params: SchedParams) -> io::Result<Self> {
        SchedulerSystem::with_panic_handler(params, None)
    }

    pub fn with_panic_handler(
        params: SchedParams,
        panic_handler: Option<Box<PanicHandler>>,
    ) -> io::Result<Self> {
        info!("Setup scheduler with {} workers.", params.num.max(1));

        Ok(SchedulerSystem {
            scheduler: Some(Scheduler::new(
                params.num,
                params.stack_size,
                panic_handler,
            )?),
            terminated: AtomicBool::new(false),
        })
    }

    /// Creates a scheduler without any worker, tasks are executed inline on the
    /// submitting thread.
    pub fn headless() -> Self {
        SchedulerSystem {
            scheduler: None,
            terminated: AtomicBool::new(false),
        }
    }

    /// Returns true if this scheduler executes tasks inline.
    #[inline]
    pub fn is_headless(&self) -> bool {
        self.scheduler.is_none()
    }

    /// Signals that the thread-pool has been dropped. Blocks current thread until all
    /// the workers finished their queued jobs gracefully. Tasks submitted afterwards
    /// are executed inline.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(ref scheduler) = self.scheduler {
            scheduler.terminate_dec();

            // A worker can not wait for itself, the remaining jobs are still drained by
            // the others.
            if !scheduler.is_worker_thread() {
                scheduler.wait_until_terminated();
            }
        }
    }

    /// Spawn an asynchronous job in the `Scheduler`.
    pub fn spawn<T, F>(&self, name: T, func: F)
    where
        T: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        match self.scheduler {
            Some(ref scheduler) if !self.terminated.load(Ordering::SeqCst) => {
                scheduler.inject(name.into(), Box::new(func));
            }
            _ => func(),
        }
    }
}

impl Dispatcher for SchedulerSystem {
    fn submit(&self, name: &str, work: Box<dyn FnOnce() + Send>) {
        self.spawn(name, work);
    }
}

impl Drop for SchedulerSystem {
    fn drop(&mut self) {
        self.terminate();
    }
}
