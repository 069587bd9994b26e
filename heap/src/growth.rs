use crate::{
    HeapSettings,
    slab::{HEAP_ALIGN, MIN_OBJECT_SIZE, MIN_SLAB_SIZE, align_up},
    sweep::SweepStats,
};

/// How the two growth triggers combine after a collection.
///
/// - *fragmented*: the largest block freed is smaller than the request.
/// - *crowded*: live bytes exceed `grow_ratio` of the total heap size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrowPolicy {
    /// Grow when either trigger fires.
    #[default]
    Either,
    /// Grow only when both fire.
    Both,
}

impl GrowPolicy {
    #[inline]
    pub fn combine(self, fragmented: bool, crowded: bool) -> bool {
        match self {
            GrowPolicy::Either => fragmented || crowded,
            GrowPolicy::Both => fragmented && crowded,
        }
    }
}

/// Whether a failed allocation of `request` bytes warrants a new slab.
/// The configured maximum is checked separately by the caller.
pub(crate) fn wants_growth(
    settings: &HeapSettings,
    swept: SweepStats,
    live: usize,
    total: usize,
    request: usize,
) -> bool {
    let fragmented = swept.max_freed < request;
    let crowded = live as f64 > total as f64 * settings.grow_ratio;
    settings.grow_policy.combine(fragmented, crowded)
}

/// Size of the next slab: twice the larger of the last slab and the
/// request, clamped so the total stays within `max` (0 = unbounded).
/// `None` when the clamped slab could not hold the request.
pub(crate) fn next_slab_size(last: usize, request: usize, total: usize, max: usize) -> Option<usize> {
    let mut size = align_up(last.max(request).saturating_mul(2), HEAP_ALIGN)?;
    if max != 0 {
        size = size.min(max.saturating_sub(total)) & !(HEAP_ALIGN - 1);
        if size < request.saturating_add(MIN_OBJECT_SIZE).max(MIN_SLAB_SIZE) {
            return None;
        }
    }
    Some(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_combination() {
        assert!(GrowPolicy::Either.combine(true, false));
        assert!(GrowPolicy::Either.combine(false, true));
        assert!(!GrowPolicy::Either.combine(false, false));
        assert!(GrowPolicy::Both.combine(true, true));
        assert!(!GrowPolicy::Both.combine(true, false));
        assert!(!GrowPolicy::Both.combine(false, true));
    }

    #[test]
    fn test_triggers() {
        let settings = HeapSettings::default();
        let roomy = SweepStats { max_freed: 4096, sum_freed: 4096 };
        assert!(!wants_growth(&settings, roomy, 1000, 10_000, 64));
        assert!(wants_growth(&settings, roomy, 1000, 10_000, 8192));
        assert!(wants_growth(&settings, roomy, 8000, 10_000, 64));

        let both = HeapSettings {
            grow_policy: GrowPolicy::Both,
            ..Default::default()
        };
        assert!(!wants_growth(&both, roomy, 1000, 10_000, 8192));
        assert!(wants_growth(&both, roomy, 8000, 10_000, 8192));
    }

    #[test]
    fn test_next_slab_doubles() {
        assert_eq!(next_slab_size(4096, 64, 4096, 0), Some(8192));
        assert_eq!(next_slab_size(4096, 10_000, 4096, 0), Some(20_000));
    }

    #[test]
    fn test_next_slab_clamped_to_max() {
        assert_eq!(next_slab_size(4096, 64, 4096, 6000), Some(1904));
        assert_eq!(next_slab_size(4096, 4096, 4096, 6000), None);
        assert_eq!(next_slab_size(4096, 64, 6000, 6000), None);
    }

    #[test]
    fn test_next_slab_for_huge_requests() {
        assert_eq!(next_slab_size(4096, 1 << 63, 4096, 0), None);
        assert_eq!(next_slab_size(4096, usize::MAX - 15, 4096, 0), None);
        assert_eq!(next_slab_size(4096, usize::MAX - 15, 4096, 1 << 20), None);
    }
}
