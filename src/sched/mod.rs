//! A small work-stealing thread pool that executes the asynchronous parts of resource
//! loading.
//!
//! Tasks are injected into a shared FIFO queue, workers move batches of them into
//! their own FIFO deques and steal from each other when they run dry. A panic inside
//! a task is caught, handed to the panic handler (or logged), and never takes the
//! worker down with it.
//!
//! ```rust,ignore
//! let sched = SchedulerSystem::new(SchedParams::default())?;
//! sched.spawn("Hello", || println!("hello from a worker"));
//! sched.terminate();
//! ```

pub mod latch;

mod scheduler;
mod system;
mod unwind;

pub use self::system::{PanicHandler, SchedParams, SchedulerSystem};
pub use self::unwind::{halt_unwinding, panic_message};

/// A sink of named, independent work items. Items may run on any thread, in any
/// order relative to each other, and possibly inline before `submit` returns.
pub trait Dispatcher: Send + Sync + 'static {
    fn submit(&self, name: &str, work: Box<dyn FnOnce() + Send>);
}

/// Runs every submitted work item inline on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn submit(&self, name: &str, work: Box<dyn FnOnce() + Send>) {
        trace!("Executes task '{}' inline.", name);
        work();
    }
}

pub mod prelude {
    pub use super::{Dispatcher, InlineDispatcher, SchedParams, SchedulerSystem};
}
