//! Listing-refresh throttling for batch operations.
//!
//! Refreshing a remote listing after every file of a large batch is slow.
//! The stride grows with batch size; the first and last file always refresh.

/// Cap on the stride for large batches
pub const DEFAULT_MAX_STRIDE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshThrottle {
    max_stride: usize,
}

impl Default for RefreshThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STRIDE)
    }
}

impl RefreshThrottle {
    pub fn new(max_stride: usize) -> Self {
        Self {
            max_stride: max_stride.max(1),
        }
    }

    pub fn stride(&self, total: usize) -> usize {
        if total < 5 {
            2
        } else if total < 10 {
            3
        } else if total < 25 {
            5
        } else {
            (total / 10 + 4).min(self.max_stride)
        }
    }

    /// Whether to refresh after the item at zero-based `index` of `total`.
    ///
    /// Between first and last, the 1-based position must be a multiple of the stride.
    pub fn should_refresh(&self, index: usize, total: usize) -> bool {
        if total == 0 || index >= total {
            return false;
        }
        if index == 0 || index == total - 1 {
            return true;
        }
        (index + 1) % self.stride(total) == 0
    }
}
