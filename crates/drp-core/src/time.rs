//! Layer 0: Time primitives
//!
//! Wall-clock milliseconds behind an injectable source. Causal ordering
//! comes from the hash graph, not from timestamps; timestamps only gate
//! admission (monotone along dependency edges, never from the future).

use std::sync::{Arc, OnceLock, RwLock};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
///
/// Read once per vertex creation; compared during validation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// Current wall-clock time from the process-wide source.
    pub fn now() -> Self {
        let source = wall_clock_source()
            .read()
            .unwrap_or_else(|err| err.into_inner());
        Self(source.now_ms())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait WallClockSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

struct SystemWallClockSource;

impl WallClockSource for SystemWallClockSource {
    fn now_ms(&self) -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

fn wall_clock_source() -> &'static RwLock<Arc<dyn WallClockSource>> {
    static SOURCE: OnceLock<RwLock<Arc<dyn WallClockSource>>> = OnceLock::new();
    SOURCE.get_or_init(|| RwLock::new(Arc::new(SystemWallClockSource)))
}

#[cfg(any(test, feature = "test-harness"))]
static WALL_CLOCK_LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();

#[cfg(any(test, feature = "test-harness"))]
pub struct WallClockGuard {
    prev: Arc<dyn WallClockSource>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

#[cfg(any(test, feature = "test-harness"))]
impl Drop for WallClockGuard {
    fn drop(&mut self) {
        let mut guard = wall_clock_source()
            .write()
            .unwrap_or_else(|err| err.into_inner());
        *guard = self.prev.clone();
    }
}

/// Install a test clock. The returned guard restores the previous source
/// and serializes clock-mocking tests against each other.
#[cfg(any(test, feature = "test-harness"))]
pub fn set_wall_clock_source_for_tests(source: Arc<dyn WallClockSource>) -> WallClockGuard {
    let lock = WALL_CLOCK_LOCK
        .get_or_init(|| std::sync::Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner());
    let mut guard = wall_clock_source()
        .write()
        .unwrap_or_else(|err| err.into_inner());
    let prev = guard.clone();
    *guard = source;
    WallClockGuard { prev, _lock: lock }
}

#[cfg(any(test, feature = "test-harness"))]
pub struct FixedClock(pub std::sync::atomic::AtomicU64);

#[cfg(any(test, feature = "test-harness"))]
impl FixedClock {
    pub fn new(ms: u64) -> Arc<Self> {
        Arc::new(Self(std::sync::atomic::AtomicU64::new(ms)))
    }

    pub fn set(&self, ms: u64) {
        self.0.store(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(any(test, feature = "test-harness"))]
impl WallClockSource for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}
