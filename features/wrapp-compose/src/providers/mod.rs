use crate::{
    contract::CompositionContract,
    errors::Result,
    promise::{DependencyAccessor, ExportDescriptorPromise},
};

pub mod instance;
pub mod lazy;
pub mod many;

/// Supplies promises for the contracts it knows how to produce
///
/// A provider which can't satisfy a contract returns no promises, it never fails on a mismatch.
pub trait ExportDescriptorProvider: Send + Sync {
    fn get_export_descriptors(
        &self,
        contract: &CompositionContract,
        accessor: &dyn DependencyAccessor,
    ) -> Result<Vec<ExportDescriptorPromise>>;
}
