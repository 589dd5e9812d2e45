use crate::{
    contract::{CompositionContract, ContractShape, IMPORT_MANY_CONSTRAINT},
    errors::{CompositionError, Result},
    formatters::format_type_name,
    promise::{DependencyAccessor, ExportDescriptor, ExportDescriptorPromise},
    types::Metadata,
};

use super::{lazy::is_lazy_type, ExportDescriptorProvider};

/// Satisfies "many" imports with every export of the element contract, in discovery order
///
/// The imported container is empty if nothing matches.
pub struct ImportManyExportDescriptorProvider;

impl ExportDescriptorProvider for ImportManyExportDescriptorProvider {
    fn get_export_descriptors(
        &self,
        contract: &CompositionContract,
        _accessor: &dyn DependencyAccessor,
    ) -> Result<Vec<ExportDescriptorPromise>> {
        let ContractShape::Many(shape) = *contract.contract_type().shape() else {
            return Ok(Vec::new());
        };
        let Some((true, unwrapped)) = contract.try_unwrap_bool_constraint(IMPORT_MANY_CONSTRAINT) else {
            return Ok(Vec::new());
        };

        let element_type = shape.element_type();
        if matches!(element_type.shape(), ContractShape::Single) && is_lazy_type(element_type.info()) {
            return Err(CompositionError::UnsupportedContract {
                contract: contract.to_string(),
                reason: "lazy elements have to be imported as `Vec<Lazy<T, M>>`",
            });
        }
        let element_contract = unwrapped.change_type(element_type);
        let origin = format_type_name(contract.contract_type().type_name());

        let promise = ExportDescriptorPromise::new(
            contract.clone(),
            origin,
            false,
            move |accessor| accessor.resolve_dependencies("item", &element_contract, true),
            move |dependencies| {
                let descriptors = dependencies
                    .iter()
                    .map(|dependency| dependency.get_descriptor())
                    .collect::<Result<Vec<_>>>()?;

                Ok(ExportDescriptor::new(
                    move |scope, operation| {
                        let items = descriptors
                            .iter()
                            .map(|descriptor| descriptor.activate(scope, operation))
                            .collect::<Result<Vec<_>>>()?;
                        (shape.collect)(items)
                    },
                    Metadata::new(),
                ))
            },
        );

        Ok(vec![promise])
    }
}
