use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Hands out controller ids. Clones share the same underlying counter, so
/// one handle per process is created and passed to every controller.
#[derive(Debug, Clone, Default)]
pub struct InstanceCounter {
    next: Arc<AtomicU64>,
}

impl InstanceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns 0 on the first call, then strictly increasing values.
    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

static RUN_ID: OnceLock<RunId> = OnceLock::new();

/// Random token fixed for the lifetime of the process. Combined with the
/// controller id and instance index it names one telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunId(u32);

impl RunId {
    pub fn current() -> RunId {
        *RUN_ID.get_or_init(|| RunId(rand::random::<u32>()))
    }

    pub fn stream_id(&self, env_id: u64, instance: usize) -> String {
        format!("{self}:{env_id}:{}", instance + 1)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
