//! The applier's only external configuration surface (§6): no CLI, no general env vars, just
//! the rewrite threshold and a debug corruption-ignore toggle, grounded on
//! `vector_buffers::config::DiskBufferConfig`'s role as the single settings bag threaded
//! through the buffer machinery.

use std::sync::OnceLock;

/// Settings threaded through [`crate::sync::sync_map`].
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// §4.G step 3: if the distance from the map's tail to the log head exceeds this many
    /// bytes, the index is marked for rewrite.
    pub rewrite_min_log_bytes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rewrite_min_log_bytes: 8 * 1024 * 1024,
        }
    }
}

/// The debug-time integrity checker (§4.H) is skipped when this toggle is set. Read once at
/// init (§9 "Global state ... no other module-level state is required") and cached.
pub fn debug_corruption_checks_enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| {
        std::env::var("MAILBOX_INDEX_DISABLE_CORRUPTION_CHECKS")
            .map(|v| v != "1")
            .unwrap_or(true)
    })
}
