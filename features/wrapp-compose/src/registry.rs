use std::{
    cell::RefCell,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::ReentrantMutex;

use crate::{
    contract::CompositionContract,
    dependency_graph::DependencyGraph,
    errors::{CompositionError, Result},
    formatters::readable_list,
    promise::{DependencyAccessor, ExportDescriptor, ExportDescriptorPromise},
    providers::ExportDescriptorProvider,
};

type Promises = Arc<[Arc<ExportDescriptorPromise>]>;

#[derive(Default)]
struct RegistryState {
    /// Promises of every contract queried so far
    promises: HashMap<CompositionContract, Promises>,
    /// Contracts whose providers are being asked right now
    querying: HashSet<CompositionContract>,
}

/// Resolves contracts into export descriptors, using the registered providers
///
/// Querying, declaring and building all happen under one re-entrant lock, so a resolution
/// only ever observes its own thread.
pub struct ExportDescriptorRegistry {
    providers: Vec<Box<dyn ExportDescriptorProvider>>,
    state: ReentrantMutex<RefCell<RegistryState>>,
}

impl ExportDescriptorRegistry {
    pub fn new(providers: Vec<Box<dyn ExportDescriptorProvider>>) -> Self {
        ExportDescriptorRegistry {
            providers,
            state: ReentrantMutex::new(RefCell::new(RegistryState::default())),
        }
    }

    /// The descriptor of the only export of the contract, None if there is none
    pub fn try_get_single(&self, contract: &CompositionContract) -> Result<Option<ExportDescriptor>> {
        let _resolving = self.state.lock();

        let promises = self.get_promises(contract)?;
        let promise = match &promises[..] {
            [] => return Ok(None),
            [promise] => promise,
            promises => {
                return Err(CompositionError::AmbiguousMatch {
                    contract: contract.to_string(),
                    origins: readable_list(promises.iter().map(|promise| promise.origin())),
                })
            }
        };

        DependencyGraph::new(self).check(promise)?;
        promise.get_descriptor().map(Some)
    }

    fn query(&self, contract: &CompositionContract) -> Result<Vec<Arc<ExportDescriptorPromise>>> {
        let mut promises = Vec::new();
        for provider in &self.providers {
            let provided = provider.get_export_descriptors(contract, self)?;
            promises.extend(provided.into_iter().map(Arc::new));
        }
        Ok(promises)
    }
}

impl DependencyAccessor for ExportDescriptorRegistry {
    fn get_promises(&self, contract: &CompositionContract) -> Result<Promises> {
        let state = self.state.lock();

        let existing = state.borrow().promises.get(contract).cloned();
        if let Some(existing) = existing {
            return Ok(existing);
        }

        if !state.borrow_mut().querying.insert(contract.clone()) {
            return Err(CompositionError::CyclicDependency {
                chain: vec![contract.to_string(), contract.to_string()],
            });
        }
        let queried = self.query(contract);
        state.borrow_mut().querying.remove(contract);

        let promises: Promises = queried?.into();
        tracing::debug!("Found {} export(s) for '{contract}'", promises.len());

        state
            .borrow_mut()
            .promises
            .insert(contract.clone(), promises.clone());
        Ok(promises)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        lifetime::LifetimeContext,
        operation::CompositionOperation,
        providers::{instance::InstanceExportDescriptorProvider, many::ImportManyExportDescriptorProvider},
    };

    struct CountingProvider(Arc<AtomicUsize>);
    impl ExportDescriptorProvider for CountingProvider {
        fn get_export_descriptors(
            &self,
            _contract: &CompositionContract,
            _accessor: &dyn DependencyAccessor,
        ) -> Result<Vec<ExportDescriptorPromise>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    /// Asks for its own contract while being queried
    struct SelfQueryingProvider;
    impl ExportDescriptorProvider for SelfQueryingProvider {
        fn get_export_descriptors(
            &self,
            contract: &CompositionContract,
            accessor: &dyn DependencyAccessor,
        ) -> Result<Vec<ExportDescriptorPromise>> {
            accessor.get_promises(contract)?;
            Ok(Vec::new())
        }
    }

    #[test]
    fn queries_are_memoized_per_contract() {
        let queries = Arc::new(AtomicUsize::new(0));
        let registry = ExportDescriptorRegistry::new(vec![Box::new(CountingProvider(queries.clone()))]);

        let contract = CompositionContract::of::<u32>();
        assert!(registry.try_get_single(&contract).unwrap().is_none());
        assert!(registry.try_get_single(&contract).unwrap().is_none());
        assert_eq!(queries.load(Ordering::SeqCst), 1);

        registry.try_get_single(&contract.clone().with_name("other")).unwrap();
        assert_eq!(queries.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn more_than_one_export_is_ambiguous() {
        let registry = ExportDescriptorRegistry::new(vec![
            Box::new(InstanceExportDescriptorProvider::new(1_u32)),
            Box::new(InstanceExportDescriptorProvider::new(2_u32)),
        ]);

        let err = registry.try_get_single(&CompositionContract::of::<u32>()).unwrap_err();
        let CompositionError::AmbiguousMatch { origins, .. } = err else {
            panic!("expected an ambiguous match, got {err:?}");
        };
        assert_eq!(origins, "instance of u32, instance of u32");
    }

    #[test]
    fn many_collects_every_export() {
        let registry = ExportDescriptorRegistry::new(vec![
            Box::new(InstanceExportDescriptorProvider::new(1_u32)),
            Box::new(InstanceExportDescriptorProvider::new(2_u32)),
            Box::new(ImportManyExportDescriptorProvider),
        ]);

        let descriptor = registry
            .try_get_single(&CompositionContract::many::<Vec<Arc<u32>>>())
            .unwrap()
            .unwrap();
        let instance = CompositionOperation::run(&LifetimeContext::new_root(), &**descriptor.activator()).unwrap();
        let values: Vec<u32> = instance
            .downcast::<Vec<Arc<u32>>>()
            .unwrap()
            .iter()
            .map(|value| **value)
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[test]
    fn recursive_queries_fail() {
        let registry = ExportDescriptorRegistry::new(vec![Box::new(SelfQueryingProvider)]);

        let err = registry.try_get_single(&CompositionContract::of::<u32>()).unwrap_err();
        assert!(matches!(err, CompositionError::CyclicDependency { .. }));
    }
}
