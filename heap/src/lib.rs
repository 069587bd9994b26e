mod alloc;
mod context;
mod error;
mod growth;
mod heap;
mod mark;
mod settings;
mod slab;
mod sweep;
mod system;

#[cfg(feature = "conservative")]
mod conservative;
#[cfg(not(feature = "global-heap"))]
mod copy;
#[cfg(feature = "global-heap")]
pub mod global;
#[cfg(feature = "weak-refs")]
mod weak;

pub use context::{Context, SAVE_FRAME_CAPACITY, SaveFrame, Saved};
pub use error::HeapError;
pub use growth::GrowPolicy;
pub use heap::{GcStats, Heap, HeapInner, RootProvider};
pub use settings::HeapSettings;
pub use slab::{FreeBlocks, HEAP_ALIGN, MIN_OBJECT_SIZE, MIN_SLAB_SIZE, Slab, align_up};
pub use sweep::SweepStats;
pub use system::{OS_PAGE_SIZE, map_memory, unmap_memory};

#[cfg(feature = "conservative")]
pub use conservative::{StackBase, StackSnapshot};
#[cfg(not(feature = "global-heap"))]
pub use copy::CopyFlags;
