//! Tenant registry: maps each tenant to a database descriptor and a
//! numeric slot index. The registry is the one place new tenants are
//! admitted; every other per-tenant arena (pool manager, breaker,
//! caches) indexes by the [`TenantSlot`] handed out here rather than by
//! [`TenantId`] directly, flattening what would otherwise be a web of
//! cyclic references into a set of independent maps keyed by the same
//! integer.

use dashmap::DashMap;
use qgw_core::{error::Result, Error, ErrorCode, TenantId, TenantSlot, TenantStatus};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Which kind of backing store a tenant's database descriptor points at.
/// Only [`DatabaseKind::RelationalA`] (Postgres, via `sqlx`) has a live
/// connection adapter in [`crate::pool_manager`] today; the others are
/// represented so the registry and routing layer can reason about a
/// tenant's backend before an adapter exists for it.
pub use qgw_core::DatabaseKind;

/// A tenant's database descriptor: where its data lives and how to
/// reach it. `connection_secret` is the opaque, already-encrypted
/// connection string/credentials blob (see
/// `qgw_core::security::EncryptionService`); the registry never
/// decrypts it, only the pool manager does at checkout time.
#[derive(Debug, Clone)]
pub struct DatabaseDescriptor {
    pub tenant_id: TenantId,
    pub kind: DatabaseKind,
    pub connection_secret: Vec<u8>,
    pub status: TenantStatus,
}

struct TenantEntry {
    slot: TenantSlot,
    descriptor: arc_swap_like::Swappable<DatabaseDescriptor>,
}

/// A tiny copy-on-write cell: readers clone the `Arc` they see and keep
/// using it even after a writer installs a new one. This is what gives
/// us "in-flight requests finish against the old descriptor" for free,
/// without a lock held across the request.
mod arc_swap_like {
    use std::sync::{Arc, Mutex};

    pub struct Swappable<T>(Mutex<Arc<T>>);

    impl<T> Swappable<T> {
        pub fn new(value: T) -> Self {
            Self(Mutex::new(Arc::new(value)))
        }

        pub fn load(&self) -> Arc<T> {
            self.0.lock().expect("descriptor lock poisoned").clone()
        }

        pub fn store(&self, value: T) {
            *self.0.lock().expect("descriptor lock poisoned") = Arc::new(value);
        }
    }
}

/// Registry of tenant database descriptors, keyed by [`TenantId`] with a
/// dense [`TenantSlot`] assigned on first registration (§4.4, §9).
pub struct TenantRegistry {
    by_id: DashMap<TenantId, Arc<TenantEntry>>,
    by_slot: DashMap<usize, TenantId>,
    next_slot: AtomicUsize,
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TenantRegistry {
    pub fn new() -> Self {
        Self {
            by_id: DashMap::new(),
            by_slot: DashMap::new(),
            next_slot: AtomicUsize::new(0),
        }
    }

    /// Register a new tenant, assigning it a fresh slot. Re-registering
    /// an existing tenant id replaces its descriptor in place and keeps
    /// its slot (an atomic swap, not a remove-then-insert).
    pub fn register(&self, descriptor: DatabaseDescriptor) -> TenantSlot {
        if let Some(entry) = self.by_id.get(&descriptor.tenant_id) {
            entry.descriptor.store(descriptor);
            return entry.slot;
        }

        let slot = TenantSlot(self.next_slot.fetch_add(1, Ordering::SeqCst));
        let tenant_id = descriptor.tenant_id;
        let entry = Arc::new(TenantEntry {
            slot,
            descriptor: arc_swap_like::Swappable::new(descriptor),
        });
        self.by_id.insert(tenant_id, entry);
        self.by_slot.insert(slot.0, tenant_id);
        slot
    }

    /// Atomically swap a tenant's descriptor (e.g. database kind or
    /// connection secret rotation). Requests that already hold the old
    /// descriptor via [`Self::descriptor`] keep using it to completion.
    pub fn swap_descriptor(&self, tenant_id: TenantId, descriptor: DatabaseDescriptor) -> Result<()> {
        let entry = self
            .by_id
            .get(&tenant_id)
            .ok_or_else(|| Error::new(ErrorCode::TenantNotFound, "tenant is not registered"))?;
        entry.descriptor.store(descriptor);
        Ok(())
    }

    pub fn slot_for(&self, tenant_id: TenantId) -> Result<TenantSlot> {
        self.by_id
            .get(&tenant_id)
            .map(|e| e.slot)
            .ok_or_else(|| Error::new(ErrorCode::TenantNotFound, "tenant is not registered"))
    }

    pub fn tenant_for(&self, slot: TenantSlot) -> Option<TenantId> {
        self.by_slot.get(&slot.0).map(|id| *id)
    }

    pub fn descriptor(&self, tenant_id: TenantId) -> Result<Arc<DatabaseDescriptor>> {
        self.by_id
            .get(&tenant_id)
            .map(|e| e.descriptor.load())
            .ok_or_else(|| Error::new(ErrorCode::TenantNotFound, "tenant is not registered"))
    }

    /// Invariant I2: an inactive tenant is reachable via no routing path.
    pub fn require_active(&self, tenant_id: TenantId) -> Result<Arc<DatabaseDescriptor>> {
        let descriptor = self.descriptor(tenant_id)?;
        if descriptor.status != TenantStatus::Active {
            return Err(Error::new(ErrorCode::TenantInactive, "tenant is not active"));
        }
        Ok(descriptor)
    }

    pub fn deactivate(&self, tenant_id: TenantId) -> Result<()> {
        let mut descriptor = (*self.descriptor(tenant_id)?).clone();
        descriptor.status = TenantStatus::Inactive;
        self.swap_descriptor(tenant_id, descriptor)
    }

    pub fn activate(&self, tenant_id: TenantId) -> Result<()> {
        let mut descriptor = (*self.descriptor(tenant_id)?).clone();
        descriptor.status = TenantStatus::Active;
        self.swap_descriptor(tenant_id, descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(tenant_id: TenantId, status: TenantStatus) -> DatabaseDescriptor {
        DatabaseDescriptor {
            tenant_id,
            kind: DatabaseKind::RelationalA,
            connection_secret: vec![1, 2, 3],
            status,
        }
    }

    #[test]
    fn registers_and_assigns_increasing_slots() {
        let registry = TenantRegistry::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        let s1 = registry.register(descriptor(t1, TenantStatus::Active));
        let s2 = registry.register(descriptor(t2, TenantStatus::Active));

        assert_ne!(s1, s2);
        assert_eq!(registry.tenant_for(s1), Some(t1));
        assert_eq!(registry.tenant_for(s2), Some(t2));
    }

    #[test]
    fn reregistering_keeps_the_same_slot() {
        let registry = TenantRegistry::new();
        let t1 = TenantId::new();

        let s1 = registry.register(descriptor(t1, TenantStatus::Active));
        let s2 = registry.register(descriptor(t1, TenantStatus::Inactive));

        assert_eq!(s1, s2);
        assert_eq!(registry.descriptor(t1).unwrap().status, TenantStatus::Inactive);
    }

    #[test]
    fn inactive_tenant_is_unreachable() {
        let registry = TenantRegistry::new();
        let t1 = TenantId::new();
        registry.register(descriptor(t1, TenantStatus::Inactive));

        let err = registry.require_active(t1).unwrap_err();
        assert_eq!(err.code, ErrorCode::TenantInactive);
    }

    #[test]
    fn in_flight_handle_survives_a_later_swap() {
        let registry = TenantRegistry::new();
        let t1 = TenantId::new();
        registry.register(descriptor(t1, TenantStatus::Active));

        let held = registry.descriptor(t1).unwrap();
        registry.deactivate(t1).unwrap();

        assert_eq!(held.status, TenantStatus::Active);
        assert_eq!(registry.descriptor(t1).unwrap().status, TenantStatus::Inactive);
    }
}
