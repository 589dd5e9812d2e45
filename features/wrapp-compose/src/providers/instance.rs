use std::sync::Arc;

use crate::{
    contract::{CompositionContract, ContractType},
    errors::Result,
    formatters::format_type_name,
    promise::{DependencyAccessor, ExportDescriptor, ExportDescriptorPromise},
    types::{Injectable, Instance, Metadata, MetadataValue},
};

use super::ExportDescriptorProvider;

/// Exports an already created value
pub struct InstanceExportDescriptorProvider {
    contract_type: ContractType,
    contract_name: Option<String>,
    metadata: Metadata,
    instance: Instance,
}

impl InstanceExportDescriptorProvider {
    pub fn new<T: Injectable>(instance: T) -> Self {
        InstanceExportDescriptorProvider {
            contract_type: ContractType::of::<T>(),
            contract_name: None,
            metadata: Metadata::new(),
            instance: Instance::new(instance),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn matches(&self, contract: &CompositionContract) -> bool {
        contract.contract_type() == &self.contract_type
            && contract.contract_name() == self.contract_name.as_deref()
            && contract.is_satisfied_by(&self.metadata)
    }
}

impl ExportDescriptorProvider for InstanceExportDescriptorProvider {
    fn get_export_descriptors(
        &self,
        contract: &CompositionContract,
        _accessor: &dyn DependencyAccessor,
    ) -> Result<Vec<ExportDescriptorPromise>> {
        if !self.matches(contract) {
            return Ok(Vec::new());
        }

        let instance = self.instance.clone();
        let metadata = Arc::new(self.metadata.clone());
        let origin = format!("instance of {}", format_type_name(self.contract_type.type_name()));

        Ok(vec![ExportDescriptorPromise::without_dependencies(
            contract.clone(),
            origin,
            true,
            move |_| Ok(ExportDescriptor::new(move |_, _| Ok(instance.clone()), metadata)),
        )])
    }
}
