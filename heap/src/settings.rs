use crate::growth::GrowPolicy;
use crate::slab::MIN_SLAB_SIZE;

/// Runtime configuration of a [`Heap`](crate::Heap).
#[derive(Debug, Clone)]
pub struct HeapSettings {
    /// Size in bytes of the first slab.
    pub initial_size: usize,
    /// Upper bound on the total of all slab sizes. 0 = unbounded.
    pub max_size: usize,
    /// Live occupancy (0.0 - 1.0) of the total size above which the heap
    /// counts as crowded after a collection.
    pub grow_ratio: f64,
    /// How "largest freed block too small" and "crowded" combine.
    pub grow_policy: GrowPolicy,
    /// With conservative scanning, only stack hits of this type tag are kept.
    pub preserve_tag: Option<u8>,
}

impl Default for HeapSettings {
    fn default() -> Self {
        Self {
            initial_size: 2 * 1024 * 1024, // 2 MB
            max_size: 0,
            grow_ratio: 0.75,
            grow_policy: GrowPolicy::Either,
            preserve_tag: None,
        }
    }
}

impl HeapSettings {
    #[inline]
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.initial_size < MIN_SLAB_SIZE {
            return Err("initial_size too small for a slab");
        }
        if self.max_size != 0 && self.max_size < self.initial_size {
            return Err("max_size must be 0 or at least initial_size");
        }
        if !(0.0..=1.0).contains(&self.grow_ratio) {
            return Err("grow_ratio must be between 0.0 and 1.0");
        }
        if self.preserve_tag == Some(0) {
            return Err("preserve_tag 0 is never a valid tag");
        }
        Ok(())
    }
}
