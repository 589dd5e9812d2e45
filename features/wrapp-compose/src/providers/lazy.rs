use std::{
    any::type_name,
    fmt::Debug,
    ops::Deref,
    sync::{Arc, OnceLock, Weak},
};

use parking_lot::Mutex;

use crate::{
    contract::{CompositionContract, ContractShape},
    errors::{CompositionError, Result},
    formatters::format_type_name,
    lifetime::LifetimeContext,
    operation::CompositionOperation,
    promise::{Activator, DependencyAccessor, ExportDescriptor, ExportDescriptorPromise},
    types::{DynError, Injectable, Metadata, TypeInfo},
};

use super::ExportDescriptorProvider;

/// Typed view over the metadata of an export
pub trait MetadataView: Injectable + Sized {
    fn project(metadata: &Metadata) -> std::result::Result<Self, DynError>;
}
/// Ignores the metadata
impl MetadataView for () {
    fn project(_metadata: &Metadata) -> std::result::Result<Self, DynError> {
        Ok(())
    }
}
/// The raw metadata
impl MetadataView for Metadata {
    fn project(metadata: &Metadata) -> std::result::Result<Self, DynError> {
        Ok(metadata.clone())
    }
}

fn project<M: MetadataView>(metadata: &Metadata) -> Result<M> {
    M::project(metadata).map_err(|error| CompositionError::MetadataView {
        view: type_name::<M>(),
        error: Arc::new(error),
    })
}

/// Lazily created export, with its metadata available up front
///
/// The value is created on first access, in a new [CompositionOperation] within the scope the
/// lazy was imported into. The outcome of that first access, success or failure, is kept.
///
/// ### Panics
///
/// [Lazy::get] and [Deref] panic if the value could not be created, use [Lazy::try_get] to
/// handle the error.
pub struct Lazy<T: Injectable, M: MetadataView = ()>(Arc<LazyInner<T, M>>);
struct LazyInner<T: Injectable, M: MetadataView> {
    once: OnceLock<Result<Arc<T>, CompositionError>>,
    scope: LifetimeContext,
    activator: Activator,
    metadata: Arc<M>,
}

impl<T: Injectable, M: MetadataView> Lazy<T, M> {
    fn new(scope: LifetimeContext, activator: Activator, metadata: Arc<M>) -> Self {
        Lazy(Arc::new(LazyInner {
            once: OnceLock::new(),
            scope,
            activator,
            metadata,
        }))
    }

    /// Accesses the value, creating it if needed
    ///
    /// Forcing the lazy again while its value is being created on the same thread fails with
    /// [CompositionError::CyclicDependency]. Other threads wait for the first result.
    pub fn try_get(&self) -> Result<&Arc<T>> {
        if let Some(created) = self.0.once.get() {
            return created.as_ref().map_err(Clone::clone);
        }

        let key = Arc::as_ptr(&self.0) as *const () as usize;
        let Some(_forcing) = forcing::enter(key) else {
            let name = format_type_name(type_name::<Self>());
            return Err(CompositionError::CyclicDependency {
                chain: vec![name.clone(), name],
            });
        };

        self.0
            .once
            .get_or_init(|| {
                tracing::debug!("Creating lazy value of '{}'", type_name::<T>());
                CompositionOperation::run(&self.0.scope, &*self.0.activator)?.downcast::<T>()
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Accesses the value, creating it if needed
    ///
    /// # Panics
    /// - If the value could not be created
    pub fn get(&self) -> &Arc<T> {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("Lazy value of '{}' could not be created: {err}", type_name::<T>()),
        }
    }

    pub fn metadata(&self) -> &M {
        &self.0.metadata
    }

    pub fn is_value_created(&self) -> bool {
        self.0.once.get().is_some()
    }
}
impl<T: Injectable, M: MetadataView> Deref for Lazy<T, M> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        self.get()
    }
}
impl<T: Injectable, M: MetadataView> Clone for Lazy<T, M> {
    fn clone(&self) -> Self {
        Lazy(self.0.clone())
    }
}
impl<T: Injectable + Debug, M: MetadataView + Debug> Debug for Lazy<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("value", &self.0.once.get())
            .field("metadata", &self.0.metadata)
            .finish()
    }
}

/// Lazies being forced on this thread
mod forcing {
    use std::cell::RefCell;

    thread_local! {
        static FORCING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
    }

    pub(super) struct ForcingGuard(usize);
    impl Drop for ForcingGuard {
        fn drop(&mut self) {
            FORCING.with_borrow_mut(|forcing| forcing.retain(|key| *key != self.0));
        }
    }

    /// None if the lazy is already being forced further up this thread
    pub(super) fn enter(key: usize) -> Option<ForcingGuard> {
        FORCING.with_borrow_mut(|forcing| {
            if forcing.contains(&key) {
                return None;
            }
            forcing.push(key);
            Some(ForcingGuard(key))
        })
    }
}

/// Whether the type is a [Lazy], whatever its parameters
pub(crate) fn is_lazy_type(info: TypeInfo) -> bool {
    fn path(type_name: &str) -> &str {
        type_name.split('<').next().unwrap_or(type_name)
    }
    path(info.type_name) == path(type_name::<Lazy<(), ()>>())
}

/// Where a lazy export gets its value from
pub enum LazySource {
    /// The value descriptor has been built
    Resolved(ExportDescriptor),
    /// The value is still being built, the lazy closes a cycle
    Deferred(Weak<ExportDescriptorPromise>),
}

/// Builds the descriptor of a [Lazy] export
///
/// Neither variant activates the value, that happens when the lazy is first accessed.
pub(crate) fn build_descriptor<T: Injectable, M: MetadataView>(source: LazySource) -> Result<ExportDescriptor> {
    match source {
        LazySource::Resolved(descriptor) => {
            let metadata = Arc::new(project::<M>(descriptor.metadata())?);
            let activator = descriptor.activator().clone();

            Ok(ExportDescriptor::new(
                move |scope, _operation| {
                    let lazy = Lazy::<T, M>::new(scope.clone(), activator.clone(), metadata.clone());
                    Ok(crate::types::Instance::new(lazy))
                },
                descriptor.metadata().clone(),
            ))
        }
        LazySource::Deferred(target) => {
            let resolved: Mutex<Option<(Activator, Arc<M>)>> = Mutex::new(None);

            Ok(ExportDescriptor::new(
                move |scope, _operation| {
                    let (activator, metadata) = {
                        let mut resolved = resolved.lock();
                        match &*resolved {
                            Some(existing) => existing.clone(),
                            None => {
                                let target = target.upgrade().ok_or(CompositionError::InvariantViolation(
                                    "Export descriptor promise was dropped while still referenced.",
                                ))?;
                                let descriptor = target.get_descriptor()?;
                                let entry = (
                                    descriptor.activator().clone(),
                                    Arc::new(project::<M>(descriptor.metadata())?),
                                );
                                *resolved = Some(entry.clone());
                                entry
                            }
                        }
                    };
                    Ok(crate::types::Instance::new(Lazy::<T, M>::new(
                        scope.clone(),
                        activator,
                        metadata,
                    )))
                },
                Metadata::new(),
            ))
        }
    }
}

/// Satisfies [Lazy] imports, one promise per export of the value contract
///
/// A value contract nobody exports yields no promises.
pub struct LazyExportDescriptorProvider;

impl ExportDescriptorProvider for LazyExportDescriptorProvider {
    fn get_export_descriptors(
        &self,
        contract: &CompositionContract,
        accessor: &dyn DependencyAccessor,
    ) -> Result<Vec<ExportDescriptorPromise>> {
        let ContractShape::Lazy(shape) = *contract.contract_type().shape() else {
            return Ok(Vec::new());
        };

        if is_lazy_type(shape.value) {
            return Err(CompositionError::UnsupportedContract {
                contract: contract.to_string(),
                reason: "a lazy value can't be lazy itself",
            });
        }

        let value_contract = contract.change_type(shape.value_type());
        let origin = format_type_name(contract.contract_type().type_name());

        let promises = accessor
            .resolve_dependencies("value", &value_contract, false)?
            .into_iter()
            .map(|dependency| {
                let listed = dependency.clone();
                ExportDescriptorPromise::new(
                    contract.clone(),
                    origin.clone(),
                    false,
                    move |_| Ok(vec![listed]),
                    move |_| {
                        let target = dependency.target_promise()?;
                        let source = if target.is_building() {
                            tracing::debug!("Deferring '{}' until it is built", target.origin());
                            LazySource::Deferred(Arc::downgrade(&target))
                        } else {
                            LazySource::Resolved(dependency.get_descriptor()?)
                        };
                        (shape.build)(source)
                    },
                )
            })
            .collect();

        Ok(promises)
    }
}
