//! Subscriber Registry.
//!
//! Per-tenant sets of live real-time connections.
//!
//! Locking discipline:
//! - join/leave mutate under the write lock, never across an `.await`
//! - broadcast snapshots the tenant's handles under the read lock, releases
//!   it, then delivers; a concurrent join/leave never sees a half-sent set
//! - delivery is fire-and-forget per handle; one failing sink does not stop
//!   the others

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::tenant::TenantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

static SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

fn next_subscriber_id() -> SubscriberId {
    SubscriberId(SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Transport side of a subscriber. `deliver` must not block.
pub trait SubscriberSink: Send + Sync + 'static {
    fn is_open(&self) -> bool;
    fn deliver(&self, payload: Arc<str>) -> anyhow::Result<()>;
}

struct HandleInner {
    id: SubscriberId,
    tenant: Mutex<Option<TenantId>>,
    sink: Box<dyn SubscriberSink>,
}

/// A registered real-time connection. Cheap to clone; clones share identity.
#[derive(Clone)]
pub struct SubscriberHandle {
    inner: Arc<HandleInner>,
}

impl SubscriberHandle {
    pub fn new<S: SubscriberSink>(sink: S) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: next_subscriber_id(),
                tenant: Mutex::new(None),
                sink: Box::new(sink),
            }),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// The tenant this handle joined, if any.
    pub fn tenant(&self) -> Option<TenantId> {
        self.inner.tenant.lock().clone()
    }

    pub fn is_open(&self) -> bool {
        self.inner.sink.is_open()
    }

    fn deliver(&self, payload: Arc<str>) -> anyhow::Result<()> {
        match catch_unwind(AssertUnwindSafe(|| self.inner.sink.deliver(payload))) {
            Ok(res) => res,
            Err(_) => Err(anyhow::anyhow!("subscriber sink panicked")),
        }
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.inner.id)
            .field("tenant", &self.tenant())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct SubscriberRegistry {
    tenants: RwLock<HashMap<TenantId, HashMap<SubscriberId, SubscriberHandle>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to `tenant`'s set. A handle already in another tenant's
    /// set is moved.
    pub fn join(&self, tenant: TenantId, handle: &SubscriberHandle) {
        let mut tenants = self.tenants.write();
        let mut assoc = handle.inner.tenant.lock();

        if let Some(previous) = assoc.take() {
            if previous != tenant {
                Self::remove_locked(&mut tenants, &previous, handle.id());
            }
        }

        tenants
            .entry(tenant.clone())
            .or_default()
            .insert(handle.id(), handle.clone());
        debug!(tenant = %tenant, subscriber = %handle.id(), "subscriber joined");
        *assoc = Some(tenant);
    }

    /// Remove `handle` from whichever set holds it. Returns the tenant it
    /// left, if it had joined one.
    pub fn leave(&self, handle: &SubscriberHandle) -> Option<TenantId> {
        let mut tenants = self.tenants.write();
        let tenant = handle.inner.tenant.lock().take()?;
        Self::remove_locked(&mut tenants, &tenant, handle.id());
        debug!(tenant = %tenant, subscriber = %handle.id(), "subscriber left");
        Some(tenant)
    }

    /// Deliver `payload` to every open handle of `tenant`. Closed handles are
    /// skipped, not removed; removal follows the disconnect event only.
    pub fn broadcast(&self, tenant: &TenantId, payload: impl Into<Arc<str>>) -> BroadcastReport {
        let snapshot: Vec<SubscriberHandle> = match self.tenants.read().get(tenant) {
            Some(set) => set.values().cloned().collect(),
            None => return BroadcastReport::default(),
        };

        let payload: Arc<str> = payload.into();
        let mut report = BroadcastReport::default();
        for handle in snapshot {
            if !handle.is_open() {
                report.skipped += 1;
                continue;
            }
            match handle.deliver(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(tenant = %tenant, subscriber = %handle.id(), error = %e, "broadcast delivery failed");
                }
            }
        }

        debug!(
            tenant = %tenant,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast complete"
        );
        report
    }

    pub fn has_tenant(&self, tenant: &TenantId) -> bool {
        self.tenants.read().contains_key(tenant)
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.read().len()
    }

    pub fn subscriber_count(&self, tenant: &TenantId) -> usize {
        self.tenants.read().get(tenant).map_or(0, HashMap::len)
    }

    fn remove_locked(
        tenants: &mut HashMap<TenantId, HashMap<SubscriberId, SubscriberHandle>>,
        tenant: &TenantId,
        id: SubscriberId,
    ) {
        if let Some(set) = tenants.get_mut(tenant) {
            set.remove(&id);
            if set.is_empty() {
                tenants.remove(tenant);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Clone, Default)]
    struct Recorder {
        open: Arc<AtomicBool>,
        fail: bool,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn open() -> Self {
            let r = Self::default();
            r.open.store(true, Ordering::SeqCst);
            r
        }

        fn failing() -> Self {
            let mut r = Self::open();
            r.fail = true;
            r
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    impl SubscriberSink for Recorder {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn deliver(&self, payload: Arc<str>) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("socket gone");
            }
            self.seen.lock().push(payload.to_string());
            Ok(())
        }
    }

    #[test]
    fn join_broadcast_leave_lifecycle() {
        let registry = SubscriberRegistry::new();
        let tenant = TenantId::new("7");
        let (r1, r2) = (Recorder::open(), Recorder::open());
        let (h1, h2) = (SubscriberHandle::new(r1.clone()), SubscriberHandle::new(r2.clone()));

        registry.join(tenant.clone(), &h1);
        registry.join(tenant.clone(), &h2);
        let report = registry.broadcast(&tenant, "X");
        assert_eq!(report.delivered, 2);
        assert_eq!(r1.seen(), vec!["X"]);
        assert_eq!(r2.seen(), vec!["X"]);

        assert_eq!(registry.leave(&h1), Some(tenant.clone()));
        registry.broadcast(&tenant, "Y");
        assert_eq!(r1.seen(), vec!["X"]);
        assert_eq!(r2.seen(), vec!["X", "Y"]);

        registry.leave(&h2);
        assert!(!registry.has_tenant(&tenant));
        assert_eq!(registry.tenant_count(), 0);
    }

    #[test]
    fn closed_handles_are_skipped_not_removed() {
        let registry = SubscriberRegistry::new();
        let tenant = TenantId::new("7");
        let closed = Recorder::default();
        let h = SubscriberHandle::new(closed.clone());
        registry.join(tenant.clone(), &h);

        let report = registry.broadcast(&tenant, "X");
        assert_eq!(report, BroadcastReport { delivered: 0, skipped: 1, failed: 0 });
        assert_eq!(registry.subscriber_count(&tenant), 1);
        assert!(closed.seen().is_empty());
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let tenant = TenantId::new("7");
        let good = Recorder::open();
        registry.join(tenant.clone(), &SubscriberHandle::new(Recorder::failing()));
        registry.join(tenant.clone(), &SubscriberHandle::new(good.clone()));

        let report = registry.broadcast(&tenant, "X");
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(good.seen(), vec!["X"]);
    }

    #[test]
    fn rejoining_moves_handle_between_tenants() {
        let registry = SubscriberRegistry::new();
        let (a, b) = (TenantId::new("1"), TenantId::new("2"));
        let h = SubscriberHandle::new(Recorder::open());

        registry.join(a.clone(), &h);
        registry.join(b.clone(), &h);
        assert!(!registry.has_tenant(&a));
        assert_eq!(registry.subscriber_count(&b), 1);
        assert_eq!(h.tenant(), Some(b));
    }

    #[test]
    fn leave_without_join_is_noop() {
        let registry = SubscriberRegistry::new();
        let h = SubscriberHandle::new(Recorder::open());
        assert_eq!(registry.leave(&h), None);
    }

    #[test]
    fn broadcast_to_unknown_tenant_is_empty() {
        let registry = SubscriberRegistry::new();
        assert_eq!(registry.broadcast(&TenantId::new("404"), "X"), BroadcastReport::default());
    }

    #[test]
    fn concurrent_join_move_leave_keeps_the_registry_consistent() {
        let registry = Arc::new(SubscriberRegistry::new());
        let (a, b) = (TenantId::new("7"), TenantId::new("8"));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let (a, b) = (a.clone(), b.clone());
                std::thread::spawn(move || {
                    let h = SubscriberHandle::new(Recorder::open());
                    for _ in 0..2000 {
                        registry.join(a.clone(), &h);
                        assert!(registry.broadcast(&a, "A").delivered >= 1);
                        registry.join(b.clone(), &h);
                        assert!(registry.broadcast(&b, "B").delivered >= 1);
                        assert_eq!(registry.leave(&h), Some(b.clone()));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(registry.tenant_count(), 0);
        assert!(!registry.has_tenant(&a));
        assert!(!registry.has_tenant(&b));
    }
}
