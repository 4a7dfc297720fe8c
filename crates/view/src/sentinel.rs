//! Near-bottom detection for infinite scroll.

use chanlist_core::PaginationCursor;
use serde::{Deserialize, Serialize};

/// Geometry of the scroll container at one scroll callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ScrollMetrics {
    /// Total content height.
    pub scroll_height: f64,
    /// Visible height of the container.
    pub client_height: f64,
    pub scroll_top: f64,
}

impl ScrollMetrics {
    pub fn remaining(&self) -> f64 {
        self.scroll_height - (self.scroll_top + self.client_height)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ScrollSentinel {
    threshold: f64,
}

impl ScrollSentinel {
    pub fn new(threshold: f64) -> Self { Self { threshold } }

    /// True when the next page should be requested.
    pub fn should_request(&self, metrics: &ScrollMetrics, cursor: &PaginationCursor, busy: bool) -> bool {
        !busy && cursor.has_next() && metrics.remaining() < self.threshold
    }
}
