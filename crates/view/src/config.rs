//! List tunables and their environment overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: u32 = 15;
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;
pub const DEFAULT_SCROLL_THRESHOLD: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListConfig {
    pub page_size: u32,
    pub debounce: Duration,
    /// Remaining scroll distance below which the next page is requested.
    pub scroll_threshold: f64,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            scroll_threshold: DEFAULT_SCROLL_THRESHOLD,
        }
    }
}

impl ListConfig {
    /// Defaults overridden by `CHANLIST_PAGE_SIZE`, `CHANLIST_DEBOUNCE_MS` and
    /// `CHANLIST_SCROLL_THRESHOLD`. Zero or unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let page_size = get("CHANLIST_PAGE_SIZE")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(d.page_size);
        let debounce = get("CHANLIST_DEBOUNCE_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|v| *v > 0)
            .map(Duration::from_millis)
            .unwrap_or(d.debounce);
        let scroll_threshold = get("CHANLIST_SCROLL_THRESHOLD")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v > 0.0)
            .unwrap_or(d.scroll_threshold);
        Self { page_size, debounce, scroll_threshold }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn overrides_and_fallbacks() {
        let env: HashMap<&str, &str> = [
            ("CHANLIST_PAGE_SIZE", "30"),
            ("CHANLIST_DEBOUNCE_MS", "0"),
            ("CHANLIST_SCROLL_THRESHOLD", "abc"),
        ]
        .into_iter()
        .collect();
        let cfg = ListConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.page_size, 30);
        assert_eq!(cfg.debounce, Duration::from_millis(DEFAULT_DEBOUNCE_MS));
        assert_eq!(cfg.scroll_threshold, DEFAULT_SCROLL_THRESHOLD);
    }
}
