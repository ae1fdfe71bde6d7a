//! Process-wide access to one `Resources` instance.
//!
//! The instance is installed explicitly with `setup` and torn down with `discard`,
//! nothing is constructed lazily.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use super::resources::Resources;

static CTX: AtomicPtr<Resources> = AtomicPtr::new(ptr::null_mut());

/// Installs `resources` as the process-wide instance. Returns it back if there is one
/// installed already.
pub fn setup(resources: Resources) -> Result<(), Resources> {
    let ptr = Box::into_raw(Box::new(resources));
    match CTX.compare_exchange(ptr::null_mut(), ptr, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => Ok(()),
        Err(_) => {
            // It has never been published, so it is still owned here.
            let resources = unsafe { Box::from_raw(ptr) };
            Err(*resources)
        }
    }
}

/// Tears down the process-wide instance, unloading all of its resources.
///
/// # Safety
///
/// References returned by `get` must not be used afterwards.
pub unsafe fn discard() {
    let ptr = CTX.swap(ptr::null_mut(), Ordering::AcqRel);
    if !ptr.is_null() {
        drop(Box::from_raw(ptr));
    }
}

/// Returns true if the process-wide instance has been set up.
#[inline]
pub fn valid() -> bool {
    !CTX.load(Ordering::Acquire).is_null()
}

/// Returns the process-wide instance, if it has been set up.
#[inline]
pub fn get() -> Option<&'static Resources> {
    let ptr = CTX.load(Ordering::Acquire);
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { &*ptr })
    }
}
