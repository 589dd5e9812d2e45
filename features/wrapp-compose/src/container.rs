use std::{fmt::Debug, sync::Arc};

use crate::{
    contract::CompositionContract,
    errors::{CompositionError, Result},
    export::Export,
    lifetime::LifetimeContext,
    operation::CompositionOperation,
    providers::lazy::{Lazy, MetadataView},
    registry::ExportDescriptorRegistry,
    types::{Injectable, Instance},
};

/// Container composing exports on request
///
/// Cheap to clone, all clones share the registry and the root scope.
#[derive(Clone)]
pub struct CompositionContainer(pub Arc<CompositionContainerInner>);
pub struct CompositionContainerInner {
    registry: ExportDescriptorRegistry,
    root: LifetimeContext,
}
impl Debug for CompositionContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionContainer")
            .field("root", &self.0.root)
            .finish_non_exhaustive()
    }
}

impl CompositionContainer {
    pub(crate) fn new(registry: ExportDescriptorRegistry) -> Self {
        Self(Arc::new(CompositionContainerInner {
            registry,
            root: LifetimeContext::new_root(),
        }))
    }

    pub fn root_scope(&self) -> &LifetimeContext {
        &self.0.root
    }

    /// A child of the root scope, owning the exports shared within its boundaries
    pub fn new_scope<I, S>(&self, boundaries: I) -> LifetimeContext
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.root.new_child(boundaries)
    }

    /// Attempts to get the requested type
    pub fn get_export<T: Injectable>(&self) -> Result<Arc<T>> {
        self.get_export_for(&CompositionContract::of::<T>())?.downcast()
    }

    /// The requested type, None if nothing exports it
    pub fn try_get_export<T: Injectable>(&self) -> Result<Option<Arc<T>>> {
        self.try_get_export_in(&self.0.root, &CompositionContract::of::<T>())?
            .map(|instance| instance.downcast())
            .transpose()
    }

    pub fn get_named_export<T: Injectable>(&self, name: &str) -> Result<Arc<T>> {
        self.get_export_for(&CompositionContract::of::<T>().with_name(name))?
            .downcast()
    }

    /// Every export of the type, in registration order
    pub fn get_exports<T: Injectable>(&self) -> Result<Vec<Arc<T>>> {
        let exports = self
            .get_export_for(&CompositionContract::many::<Vec<Arc<T>>>())?
            .downcast::<Vec<Arc<T>>>()?;
        Ok(Arc::unwrap_or_clone(exports))
    }

    /// Every export of the type, each behind a [Lazy]
    pub fn get_lazy_exports<T: Injectable, M: MetadataView>(&self) -> Result<Vec<Lazy<T, M>>> {
        let exports = self
            .get_export_for(&CompositionContract::many::<Vec<Lazy<T, M>>>())?
            .downcast::<Vec<Lazy<T, M>>>()?;
        Ok(Arc::unwrap_or_clone(exports))
    }

    /// Composes the type in a new scope, whose shared instances are released with the export
    pub fn get_scoped_export<T, I, S>(&self, boundaries: I) -> Result<Export<T>>
    where
        T: Injectable,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = self.new_scope(boundaries);
        let value = self
            .get_export_in(&scope, &CompositionContract::of::<T>())?
            .downcast::<T>()?;
        Ok(Export::new(value, move || scope.release()))
    }

    pub fn get_lazy<T: Injectable, M: MetadataView>(&self) -> Result<Lazy<T, M>> {
        let lazy = self
            .get_export_for(&CompositionContract::lazy::<T, M>())?
            .downcast::<Lazy<T, M>>()?;
        Ok((*lazy).clone())
    }

    pub fn get_export_for(&self, contract: &CompositionContract) -> Result<Instance> {
        self.get_export_in(&self.0.root, contract)
    }

    /// Composes the export within the scope
    pub fn get_export_in(&self, scope: &LifetimeContext, contract: &CompositionContract) -> Result<Instance> {
        self.try_get_export_in(scope, contract)?.ok_or_else(|| {
            tracing::error!("No export was found for '{contract}'");
            CompositionError::NoExport {
                contract: contract.to_string(),
            }
        })
    }

    pub fn try_get_export_in(&self, scope: &LifetimeContext, contract: &CompositionContract) -> Result<Option<Instance>> {
        let Some(descriptor) = self.0.registry.try_get_single(contract)? else {
            return Ok(None);
        };

        tracing::debug!("Composing '{contract}'");
        CompositionOperation::run(scope, &**descriptor.activator()).map(Some)
    }
}
