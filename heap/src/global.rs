//! A process-wide heap shared by every context.
//!
//! Explicitly initialized and torn down; access is serialized through a
//! mutex and handed to callers as `&mut Heap`, so code written against a
//! plain [`Heap`] works unchanged on the global one.

use object::TypeTable;
use parking_lot::{Mutex, const_mutex};

use crate::{Heap, HeapError, HeapSettings};

static GLOBAL_HEAP: Mutex<Option<Heap>> = const_mutex(None);

pub fn init(settings: HeapSettings, types: TypeTable) -> Result<(), HeapError> {
    let mut global = GLOBAL_HEAP.lock();
    if global.is_some() {
        return Err(HeapError::AlreadyInitialized);
    }
    *global = Some(Heap::new(settings, types)?);
    Ok(())
}

pub fn is_initialized() -> bool {
    GLOBAL_HEAP.lock().is_some()
}

/// Runs `f` with exclusive access to the global heap.
pub fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> Result<R, HeapError> {
    let mut global = GLOBAL_HEAP.lock();
    let heap = global.as_mut().ok_or(HeapError::NotInitialized)?;
    Ok(f(heap))
}

/// Releases the global heap and all of its slabs.
pub fn teardown() -> Result<(), HeapError> {
    GLOBAL_HEAP
        .lock()
        .take()
        .map(drop)
        .ok_or(HeapError::NotInitialized)
}
