use std::{any::type_name, collections::HashMap, sync::Arc};

use crate::{
    contract::{CompositionContract, ContractType, ManyContainer},
    errors::{CompositionError, Result},
    formatters::format_type_name,
    lifetime::{LifetimeContext, SharingId},
    operation::CompositionOperation,
    promise::{CompositionDependency, DependencyAccessor, ExportDescriptor, ExportDescriptorPromise},
    providers::{lazy::MetadataView, ExportDescriptorProvider},
    types::{DynError, Injectable, Instance, Metadata, MetadataValue, TypeInfo},
};

/// How instances of an export are reused
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Sharing {
    /// A new instance for every import
    #[default]
    NonShared,
    /// One instance for the whole container
    Shared,
    /// One instance per scope carrying the boundary
    SharedWithin(String),
}

/// An import declared by a factory
#[derive(Debug, Clone)]
pub struct ImportInfo {
    pub site: &'static str,
    pub contract: CompositionContract,
    /// Prerequisites are passed to [InstanceFactory::construct], the others to
    /// [InstanceFactory::satisfy] once the instance exists
    pub prerequisite: bool,
    /// An optional import is left empty if nothing matches
    pub optional: bool,
}
impl ImportInfo {
    pub fn new(site: &'static str, contract: CompositionContract) -> Self {
        ImportInfo {
            site,
            contract,
            prerequisite: true,
            optional: false,
        }
    }

    pub fn of<T: Injectable>(site: &'static str) -> Self {
        Self::new(site, CompositionContract::of::<T>())
    }

    pub fn many<C: ManyContainer>(site: &'static str) -> Self {
        Self::new(site, CompositionContract::many::<C>())
    }

    pub fn lazy<T: Injectable, M: MetadataView>(site: &'static str) -> Self {
        Self::new(site, CompositionContract::lazy::<T, M>())
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.contract = self.contract.with_name(name);
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.contract = self.contract.with_constraint(key, value);
        self
    }

    pub fn allow_default(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn non_prerequisite(mut self) -> Self {
        self.prerequisite = false;
        self
    }
}

struct ImportSlot<'a> {
    contract: &'a CompositionContract,
    value: Option<Instance>,
}

/// Activated imports of a factory, by site
pub struct Imports<'a> {
    origin: &'a str,
    values: HashMap<&'static str, ImportSlot<'a>>,
}
impl Imports<'_> {
    /// The import at the site
    pub fn get<T: Injectable>(&self, site: &str) -> Result<Arc<T>> {
        self.get_optional(site)?.ok_or_else(|| CompositionError::NoExport {
            contract: self
                .values
                .get(site)
                .map(|slot| slot.contract.to_string())
                .unwrap_or_default(),
        })
    }

    /// The import at the site, None if it was optional and nothing matched
    pub fn get_optional<T: Injectable>(&self, site: &str) -> Result<Option<Arc<T>>> {
        let slot = self.values.get(site).ok_or_else(|| CompositionError::MissingImport {
            site: site.to_string(),
            origin: self.origin.to_string(),
        })?;

        slot.value.as_ref().map(Instance::downcast::<T>).transpose()
    }
}

/// A Factory providing instances of a given type
pub trait InstanceFactory: Send + Sync + 'static {
    type Provides: Injectable;

    /// Returns the typeinfo about the factory's provided type
    fn supplies() -> TypeInfo {
        TypeInfo::of::<Self::Provides>()
    }

    /// Returns the imports the factory requires to supply its type
    fn get_imports() -> Vec<ImportInfo>;

    fn contract_name(&self) -> Option<&str> {
        None
    }

    /// Metadata attached to the export, matched against contract constraints
    fn metadata(&self) -> Metadata {
        Metadata::new()
    }

    fn sharing(&self) -> Sharing {
        Sharing::NonShared
    }

    /// Constructs a new instance from the prerequisite imports
    fn construct(&self, imports: &Imports) -> Result<Self::Provides, DynError>;

    /// Passes the non-prerequisite imports to an instance, after it has been constructed
    fn satisfy(&self, instance: &Self::Provides, imports: &Imports) -> Result<(), DynError> {
        let _ = (instance, imports);
        Ok(())
    }

    /// Called once the whole graph the instance belongs to has been composed
    fn on_imports_satisfied(&self, instance: &Self::Provides) -> Result<(), DynError> {
        let _ = instance;
        Ok(())
    }
}

/// Exports the instances of a factory
pub struct FactoryExportDescriptorProvider<F: InstanceFactory> {
    factory: Arc<F>,
    sharing_id: SharingId,
}
impl<F: InstanceFactory> FactoryExportDescriptorProvider<F> {
    pub fn new(factory: F) -> Self {
        FactoryExportDescriptorProvider {
            factory: Arc::new(factory),
            sharing_id: SharingId::allocate(),
        }
    }
}

impl<F: InstanceFactory> ExportDescriptorProvider for FactoryExportDescriptorProvider<F> {
    fn get_export_descriptors(
        &self,
        contract: &CompositionContract,
        _accessor: &dyn DependencyAccessor,
    ) -> Result<Vec<ExportDescriptorPromise>> {
        let metadata = self.factory.metadata();
        if contract.contract_type() != &ContractType::from_info(F::supplies())
            || contract.contract_name() != self.factory.contract_name()
            || !contract.is_satisfied_by(&metadata)
        {
            return Ok(Vec::new());
        }

        let sharing = self.factory.sharing();
        let origin = format_type_name(type_name::<F>());
        let factory = self.factory.clone();
        let sharing_id = self.sharing_id;

        let promise = ExportDescriptorPromise::new(
            contract.clone(),
            origin.clone(),
            sharing != Sharing::NonShared,
            |accessor| {
                let mut dependencies = Vec::new();
                for import in F::get_imports() {
                    let dependency = if import.optional {
                        accessor.try_resolve_optional_dependency(import.site, &import.contract, import.prerequisite)?
                    } else {
                        Some(accessor.resolve_required_dependency(
                            import.site,
                            &import.contract,
                            import.prerequisite,
                        )?)
                    };
                    dependencies.extend(dependency);
                }
                Ok(dependencies)
            },
            move |dependencies| {
                let activation = Arc::new(FactoryActivation {
                    imports: resolve_imports::<F>(dependencies)?,
                    factory,
                    origin,
                    sharing,
                    sharing_id,
                });

                Ok(ExportDescriptor::new(
                    move |scope, operation| activation.activate(scope, operation),
                    metadata,
                ))
            },
        );

        Ok(vec![promise])
    }
}

struct ResolvedImport {
    info: ImportInfo,
    /// None if the import is optional and nothing matched
    descriptor: Option<ExportDescriptor>,
}

fn resolve_imports<F: InstanceFactory>(dependencies: &[CompositionDependency]) -> Result<Vec<ResolvedImport>> {
    F::get_imports()
        .into_iter()
        .map(|info| {
            let descriptor = dependencies
                .iter()
                .find(|dependency| dependency.site() == info.site)
                .map(CompositionDependency::get_descriptor)
                .transpose()?;
            Ok(ResolvedImport { info, descriptor })
        })
        .collect()
}

struct FactoryActivation<F: InstanceFactory> {
    factory: Arc<F>,
    origin: String,
    sharing: Sharing,
    sharing_id: SharingId,
    imports: Vec<ResolvedImport>,
}

impl<F: InstanceFactory> FactoryActivation<F> {
    fn activate(self: &Arc<Self>, scope: &LifetimeContext, operation: &mut CompositionOperation) -> Result<Instance> {
        let boundary = match &self.sharing {
            Sharing::NonShared => return self.create(scope, operation),
            Sharing::Shared => None,
            Sharing::SharedWithin(boundary) => Some(boundary.as_str()),
        };

        let owner = scope.find_context_within(boundary)?;
        owner.get_or_create(self.sharing_id, operation, |operation| self.create(&owner, operation))
    }

    fn create(self: &Arc<Self>, scope: &LifetimeContext, operation: &mut CompositionOperation) -> Result<Instance> {
        let imports = self.activate_imports(scope, operation, true)?;
        let provided = self.factory.construct(&imports).map_err(|error| self.failed(error))?;
        let provided = Arc::new(provided);
        tracing::debug!("Constructed instance of '{}'", self.origin);

        if self.imports.iter().any(|import| !import.info.prerequisite) {
            let activation = self.clone();
            let scope = scope.clone();
            let instance = provided.clone();
            operation.add_non_prerequisite_action(move |operation| {
                let imports = activation.activate_imports(&scope, operation, false)?;
                activation
                    .factory
                    .satisfy(&instance, &imports)
                    .map_err(|error| activation.failed(error))
            })?;
        }

        let activation = self.clone();
        let instance = provided.clone();
        operation.add_post_composition_action(move |_| {
            activation
                .factory
                .on_imports_satisfied(&instance)
                .map_err(|error| activation.failed(error))
        })?;

        Ok(Instance::from_arc(provided))
    }

    fn activate_imports(
        &self,
        scope: &LifetimeContext,
        operation: &mut CompositionOperation,
        prerequisite: bool,
    ) -> Result<Imports<'_>> {
        let mut values = HashMap::new();
        for import in self.imports.iter().filter(|import| import.info.prerequisite == prerequisite) {
            let value = match &import.descriptor {
                Some(descriptor) => Some(descriptor.activate(scope, operation)?),
                None => None,
            };
            values.insert(
                import.info.site,
                ImportSlot {
                    contract: &import.info.contract,
                    value,
                },
            );
        }

        Ok(Imports {
            origin: &self.origin,
            values,
        })
    }

    fn failed(&self, error: DynError) -> CompositionError {
        CompositionError::ActivationFailed {
            origin: self.origin.clone(),
            error: Arc::new(error),
        }
    }
}
