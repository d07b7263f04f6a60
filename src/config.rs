//! Tunables governing reassembly behaviour.
//!
//! Values here are configuration, not protocol: senders and receivers need
//! not agree on them, and changing them never alters the wire format.

use std::{num::NonZeroUsize, time::Duration};

/// Default ceiling on frames parked ahead of the cursor.
const DEFAULT_MAX_PENDING_FRAMES: NonZeroUsize = NonZeroUsize::new(1024).unwrap();
/// Default ceiling on payload bytes parked ahead of the cursor (16 MiB).
const DEFAULT_MAX_PENDING_BYTES: NonZeroUsize = NonZeroUsize::new(16 * 1024 * 1024).unwrap();
/// Default inactivity window before an open stream expires.
const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(300);
/// Default period of the autonomous sweep task.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Per-stream and engine-wide reassembly tunables.
///
/// The two ceilings bound the reorder window of every stream independently;
/// exceeding either aborts that stream with a buffer-overflow outcome. The
/// inactivity timeout also doubles as the linger window after which terminal
/// streams nobody collected are reaped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use bundlestream::ReassemblyConfig;
///
/// let config = ReassemblyConfig {
///     inactivity_timeout: Duration::from_secs(60),
///     ..ReassemblyConfig::default()
/// };
/// assert!(config.max_pending_frames.get() >= 1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReassemblyConfig {
    /// Most frames a stream may park ahead of its cursor.
    pub max_pending_frames: NonZeroUsize,
    /// Most payload bytes a stream may park ahead of its cursor.
    pub max_pending_bytes: NonZeroUsize,
    /// Open streams idle longer than this expire; terminal streams left
    /// uncollected for another such window are reaped.
    pub inactivity_timeout: Duration,
    /// Period of the autonomous sweep task; must be non-zero.
    pub sweep_interval: Duration,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}
