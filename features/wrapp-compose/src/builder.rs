use crate::{
    container::CompositionContainer,
    factories::{FactoryExportDescriptorProvider, InstanceFactory},
    providers::{
        instance::InstanceExportDescriptorProvider, lazy::LazyExportDescriptorProvider,
        many::ImportManyExportDescriptorProvider, ExportDescriptorProvider,
    },
    registry::ExportDescriptorRegistry,
    types::{Injectable, Metadata},
};

/// Collects everything a [CompositionContainer] can export
///
/// Exports are discovered in registration order. "Many" and [crate::Lazy] imports are always
/// supported, their providers are registered after everything else.
pub struct ContainerBuilder {
    /// Registered providers, instances and factories included
    pub(crate) providers: Vec<Box<dyn ExportDescriptorProvider>>,
}
impl Default for ContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerBuilder {
    pub fn new() -> Self {
        ContainerBuilder { providers: Vec::new() }
    }
}
impl ContainerBuilder {
    pub fn add_instance<T: Injectable>(self, instance: T) -> Self {
        self.add_provider(InstanceExportDescriptorProvider::new(instance))
    }

    pub fn add_named_instance<T: Injectable>(self, name: impl Into<String>, instance: T) -> Self {
        self.add_provider(InstanceExportDescriptorProvider::new(instance).named(name))
    }

    pub fn add_instance_with_metadata<T: Injectable>(self, instance: T, metadata: Metadata) -> Self {
        let provider = metadata
            .into_iter()
            .fold(InstanceExportDescriptorProvider::new(instance), |provider, (key, value)| {
                provider.with_metadata(key, value)
            });
        self.add_provider(provider)
    }

    pub fn add_factory<Factory: InstanceFactory>(self, factory: Factory) -> Self {
        self.add_provider(FactoryExportDescriptorProvider::new(factory))
    }

    pub fn add_provider<Provider: ExportDescriptorProvider + 'static>(mut self, provider: Provider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    pub fn build(self) -> CompositionContainer {
        let mut providers = self.providers;
        tracing::debug!("Building container with {} providers", providers.len());

        providers.push(Box::new(ImportManyExportDescriptorProvider));
        providers.push(Box::new(LazyExportDescriptorProvider));

        CompositionContainer::new(ExportDescriptorRegistry::new(providers))
    }
}
