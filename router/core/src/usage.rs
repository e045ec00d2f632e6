use crate::quantity::Quantity;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Container-wise resource usage of one pod.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PodUsage {
    pub cpu: Quantity,
    pub memory: Quantity,
}

/// A shared pod-IP usage index.
///
/// Exactly one writer (the background refresher) publishes snapshots; any
/// number of balancer readers consult them concurrently. Readers treat a
/// missing IP the same as zeroed usage, since pods appear in the index before
/// their first metrics sample lands.
type ByIp = Arc<RwLock<HashMap<String, PodUsage>>>;

/// Publishes usage snapshots into the shared index.
#[derive(Clone, Debug, Default)]
pub struct Writer(ByIp);

/// Supports usage lookups against the most recent snapshot.
#[derive(Clone, Debug, Default)]
pub struct Reader(ByIp);

pub fn pair() -> (Writer, Reader) {
    let by_ip = ByIp::default();
    let w = Writer(by_ip.clone());
    let r = Reader(by_ip);
    (w, r)
}

// === impl Writer ===

impl Writer {
    /// Replaces the published snapshot wholesale, so IPs that left the
    /// selector stop influencing selection at the next refresh.
    pub fn replace(&self, next: HashMap<String, PodUsage>) {
        *self.0.write() = next;
    }
}

// === impl Reader ===

impl Reader {
    /// Runs `f` against the current snapshot under the shared lock, so a
    /// selection compares every candidate within one consistent view.
    pub fn with_snapshot<R>(&self, f: impl FnOnce(&HashMap<String, PodUsage>) -> R) -> R {
        f(&self.0.read())
    }
}
