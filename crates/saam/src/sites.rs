//! Borrow-site registry for the tracked level
//!
//! When enabled, every live borrow of a cell records the backtrace of the
//! place that acquired it. A refused destruction then reports where the
//! offending borrows came from.

use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static DEFAULT_TRACKING: AtomicBool = AtomicBool::new(false);

/// Set whether newly created tracked cells record borrow sites
///
/// Existing cells keep their setting. Has no effect below the tracked level.
pub fn set_default_site_tracking(enabled: bool) {
    DEFAULT_TRACKING.store(enabled, Ordering::Relaxed);
    tracing::debug!(enabled, "default borrow-site tracking changed");
}

pub fn default_site_tracking() -> bool {
    DEFAULT_TRACKING.load(Ordering::Relaxed)
}

/// Handle to one recorded site, kept by the borrow guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteId(u64);

/// Backtraces of the live borrows of one cell
pub struct SiteRegistry {
    enabled: AtomicBool,
    next: AtomicU64,
    sites: Mutex<Vec<(SiteId, Backtrace)>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(default_site_tracking()),
            next: AtomicU64::new(0),
            sites: Mutex::new(Vec::new()),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Record the caller's backtrace if tracking is on
    pub fn record(&self) -> Option<SiteId> {
        if !self.is_enabled() {
            return None;
        }
        let id = SiteId(self.next.fetch_add(1, Ordering::Relaxed));
        self.sites.lock().push((id, Backtrace::force_capture()));
        Some(id)
    }

    pub fn forget(&self, id: Option<SiteId>) {
        if let Some(id) = id {
            // newest borrows tend to be released first
            let mut sites = self.sites.lock();
            if let Some(at) = sites.iter().rposition(|(site, _)| *site == id) {
                sites.swap_remove(at);
            }
        }
    }

    /// Rendered backtraces of every recorded live borrow
    pub fn render(&self) -> Vec<String> {
        self.sites
            .lock()
            .iter()
            .map(|(_, trace)| trace.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sites.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SiteRegistry {
    fn default() -> Self {
        Self::new()
    }
}
