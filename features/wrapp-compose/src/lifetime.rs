use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{lock_api::ArcReentrantMutexGuard, Mutex, RawMutex, RawThreadId, ReentrantMutex};

use crate::{
    errors::{CompositionError, Result},
    operation::CompositionOperation,
    types::Instance,
};

/// Token guarding the shared instances of a scope tree
pub type SharingLock = Arc<ReentrantMutex<()>>;

/// Held by an operation while it activates shared exports
pub(crate) type SharingLockGuard = ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>;

/// Identifies a shared export within the instance cache of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SharingId(u64);
impl SharingId {
    pub fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        SharingId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A scope owning the shared instances created within it
///
/// Scopes form a tree. Each scope may carry sharing boundaries, exports shared within a
/// boundary live in the closest scope carrying it, while exports shared without a boundary
/// live in the root.
#[derive(Clone)]
pub struct LifetimeContext(Arc<LifetimeContextInner>);
struct LifetimeContextInner {
    parent: Option<LifetimeContext>,
    boundaries: Vec<String>,
    sharing_lock: SharingLock,
    instances: Mutex<HashMap<SharingId, Instance>>,
}

impl LifetimeContext {
    pub fn new_root() -> Self {
        LifetimeContext(Arc::new(LifetimeContextInner {
            parent: None,
            boundaries: Vec::new(),
            sharing_lock: Arc::new(ReentrantMutex::new(())),
            instances: Mutex::new(HashMap::new()),
        }))
    }

    /// A nested scope, sharing the lock of its parent
    pub fn new_child<I, S>(&self, boundaries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        LifetimeContext(Arc::new(LifetimeContextInner {
            parent: Some(self.clone()),
            boundaries: boundaries.into_iter().map(Into::into).collect(),
            sharing_lock: self.0.sharing_lock.clone(),
            instances: Mutex::new(HashMap::new()),
        }))
    }

    pub fn parent(&self) -> Option<&LifetimeContext> {
        self.0.parent.as_ref()
    }

    pub fn root(&self) -> &LifetimeContext {
        let mut scope = self;
        while let Some(parent) = scope.parent() {
            scope = parent;
        }
        scope
    }

    pub fn boundaries(&self) -> &[String] {
        &self.0.boundaries
    }

    pub fn sharing_lock(&self) -> &SharingLock {
        &self.0.sharing_lock
    }

    /// The scope owning exports shared within the boundary, the root if there is none
    pub fn find_context_within(&self, boundary: Option<&str>) -> Result<LifetimeContext> {
        let Some(boundary) = boundary else {
            return Ok(self.root().clone());
        };

        let mut scope = Some(self);
        while let Some(current) = scope {
            if current.0.boundaries.iter().any(|b| b == boundary) {
                return Ok(current.clone());
            }
            scope = current.parent();
        }

        Err(CompositionError::SharingBoundaryNotFound {
            boundary: boundary.to_string(),
        })
    }

    /// Returns the shared instance, creating it within the operation if it doesn't exist yet
    ///
    /// Creation happens under the sharing lock, which the operation keeps until it is dropped.
    pub fn get_or_create<F>(&self, id: SharingId, operation: &mut CompositionOperation, creator: F) -> Result<Instance>
    where
        F: FnOnce(&mut CompositionOperation) -> Result<Instance>,
    {
        if let Some(existing) = self.cached(id) {
            return Ok(existing);
        }

        operation.enter_sharing_lock(&self.0.sharing_lock)?;

        // Another operation might have created it while we waited for the lock
        if let Some(existing) = self.cached(id) {
            return Ok(existing);
        }

        let instance = creator(operation)?;
        self.0.instances.lock().insert(id, instance.clone());
        Ok(instance)
    }

    /// Drops the shared instances owned by this scope
    pub fn release(&self) {
        let released = std::mem::take(&mut *self.0.instances.lock());
        tracing::debug!("Released {} shared instance(s)", released.len());
    }

    fn cached(&self, id: SharingId) -> Option<Instance> {
        let instances = self.0.instances.lock();
        instances.get(&id).cloned()
    }

    pub fn ptr_eq(&self, other: &LifetimeContext) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Debug for LifetimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifetimeContext")
            .field("boundaries", &self.0.boundaries)
            .field("shared_instances", &self.0.instances.lock().len())
            .field("parent", &self.0.parent)
            .finish()
    }
}
