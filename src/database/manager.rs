use async_trait::async_trait;
use lru::LruCache;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::database::store::DocumentStore;

/// Errors from the connection registry and the physical stores
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Invalid tenant database name: {0}")]
    InvalidTenantName(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollectionName(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Duplicate key in collection '{collection}'")]
    DuplicateKey {
        collection: String,
        field: Option<String>,
    },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Shared handle to one tenant's document store
pub type TenantHandle = Arc<dyn DocumentStore>;

/// Opens the physical connection for a tenant key
#[async_trait]
pub trait TenantConnector: Send + Sync {
    async fn connect(&self, tenant: &str) -> Result<TenantHandle, DatabaseError>;
}

/// Observable lifecycle of a cached tenant connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Ready,
}

struct TenantSlot {
    cell: OnceCell<TenantHandle>,
    leases: AtomicUsize,
}

impl TenantSlot {
    fn new() -> Self {
        Self {
            cell: OnceCell::new(),
            leases: AtomicUsize::new(0),
        }
    }

    fn is_idle(&self) -> bool {
        self.leases.load(Ordering::SeqCst) == 0
    }
}

/// One counted hold on a slot, released on drop even if the open that took it
/// is cancelled mid-connect
struct SlotGuard(Arc<TenantSlot>);

impl SlotGuard {
    fn acquire(slot: Arc<TenantSlot>) -> Self {
        slot.leases.fetch_add(1, Ordering::SeqCst);
        Self(slot)
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.leases.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A borrowed tenant connection. The registry will not evict the entry while
/// any lease on it is alive; dropping the lease releases it.
pub struct TenantLease {
    tenant: String,
    handle: TenantHandle,
    _guard: SlotGuard,
}

impl TenantLease {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }
}

impl Deref for TenantLease {
    type Target = dyn DocumentStore;

    fn deref(&self) -> &Self::Target {
        self.handle.as_ref()
    }
}

/// Owns one live connection per tenant key. Concurrent first opens of the same
/// key share a single connection attempt; idle entries beyond `capacity` are
/// evicted least-recently-used first and their handles closed.
pub struct ConnectionRegistry {
    connector: Arc<dyn TenantConnector>,
    slots: Mutex<LruCache<String, Arc<TenantSlot>>>,
    capacity: usize,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn TenantConnector>, capacity: usize) -> Self {
        Self {
            connector,
            slots: Mutex::new(LruCache::unbounded()),
            capacity: capacity.max(1),
        }
    }

    /// Get a lease on the tenant's connection, connecting on first use
    pub async fn open(&self, tenant: &str) -> Result<TenantLease, DatabaseError> {
        if !Self::is_valid_tenant_key(tenant) {
            return Err(DatabaseError::InvalidTenantName(tenant.to_string()));
        }

        // Publish the slot (and take the lease) before connecting so that
        // concurrent callers join the same attempt
        let (guard, evicted) = {
            let mut slots = self.slots.lock().await;
            let slot = match slots.get(tenant) {
                Some(slot) => slot.clone(),
                None => {
                    let slot = Arc::new(TenantSlot::new());
                    slots.put(tenant.to_string(), slot.clone());
                    slot
                }
            };
            let guard = SlotGuard::acquire(slot);
            let evicted = self.evict_overflow(&mut slots);
            (guard, evicted)
        };
        Self::close_evicted(evicted).await;

        let connected = guard
            .0
            .cell
            .get_or_try_init(|| async {
                let handle = self.connector.connect(tenant).await?;
                info!("Created tenant connection for: {}", tenant);
                Ok::<_, DatabaseError>(handle)
            })
            .await
            .map(Arc::clone);

        match connected {
            Ok(handle) => Ok(TenantLease {
                tenant: tenant.to_string(),
                handle,
                _guard: guard,
            }),
            Err(err) => {
                let slot = guard.0.clone();
                drop(guard);
                self.discard_failed(tenant, &slot).await;
                warn!("Tenant connection for '{}' failed: {}", tenant, err);
                Err(match err {
                    DatabaseError::Sqlx(e) => DatabaseError::ConnectionError(e.to_string()),
                    other => other,
                })
            }
        }
    }

    /// Current state of a tenant entry, without touching its recency
    pub async fn state(&self, tenant: &str) -> Option<ConnectionState> {
        let slots = self.slots.lock().await;
        slots.peek(tenant).map(|slot| {
            if slot.cell.initialized() {
                ConnectionState::Ready
            } else {
                ConnectionState::Connecting
            }
        })
    }

    /// Drop an idle entry and close its handle. Returns false if the entry is
    /// absent or still leased.
    pub async fn evict(&self, tenant: &str) -> bool {
        let handle = {
            let mut slots = self.slots.lock().await;
            if !slots.peek(tenant).map(|slot| slot.is_idle()).unwrap_or(false) {
                return false;
            }
            slots.pop(tenant).and_then(|slot| slot.cell.get().cloned())
        };
        if let Some(handle) = handle {
            Self::close_evicted(vec![(tenant.to_string(), handle)]).await;
        }
        true
    }

    /// Close and remove every tenant connection (e.g., on shutdown)
    pub async fn close_all(&self) {
        let drained: Vec<(String, TenantHandle)> = {
            let mut slots = self.slots.lock().await;
            let mut drained = Vec::with_capacity(slots.len());
            while let Some((tenant, slot)) = slots.pop_lru() {
                if let Some(handle) = slot.cell.get() {
                    drained.push((tenant, handle.clone()));
                }
            }
            drained
        };
        for (tenant, handle) in drained {
            handle.close().await;
            info!("Closed tenant connection: {}", tenant);
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    fn evict_overflow(&self, slots: &mut LruCache<String, Arc<TenantSlot>>) -> Vec<(String, TenantHandle)> {
        let mut evicted = Vec::new();
        while slots.len() > self.capacity {
            let victim = slots
                .iter()
                .rev()
                .find(|(_, slot)| slot.is_idle())
                .map(|(tenant, _)| tenant.clone());

            let Some(tenant) = victim else {
                warn!(
                    "Tenant registry over capacity ({} > {}): every entry is leased",
                    slots.len(),
                    self.capacity
                );
                break;
            };
            if let Some(handle) = slots.pop(&tenant).and_then(|slot| slot.cell.get().cloned()) {
                evicted.push((tenant, handle));
            }
        }
        evicted
    }

    async fn close_evicted(evicted: Vec<(String, TenantHandle)>) {
        for (tenant, handle) in evicted {
            handle.close().await;
            info!("Evicted tenant connection: {}", tenant);
        }
    }

    async fn discard_failed(&self, tenant: &str, failed: &Arc<TenantSlot>) {
        let mut slots = self.slots.lock().await;
        let stale = slots
            .peek(tenant)
            .map(|slot| Arc::ptr_eq(slot, failed) && !slot.cell.initialized() && slot.is_idle())
            .unwrap_or(false);
        if stale {
            slots.pop(tenant);
        }
    }

    /// Tenant keys become part of a database name, so keep them to a safe
    /// identifier alphabet: 1-48 chars of [a-zA-Z0-9_]
    pub fn is_valid_tenant_key(name: &str) -> bool {
        !name.is_empty()
            && name.len() <= 48
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}
