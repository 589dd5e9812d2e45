//! Composition of object graphs from registered exports.
//!
//! A request for a [CompositionContract] is resolved in three steps:
//! 1. Every [ExportDescriptorProvider] is asked for promises matching the contract.
//! 2. The dependencies of each reachable promise are declared and the graph is validated.
//! 3. The promises are built into [ExportDescriptor]s, whose activators create the instances
//!    within a [CompositionOperation].
//!
//! Besides instances, factories and custom providers, every container supports "many" imports
//! (`Vec<Arc<T>>` and friends) and [Lazy] imports, which defer creation and break cycles.
//!
//! ```
//! use std::sync::Arc;
//! use wrapp_compose::{ContainerBuilder, DynError, ImportInfo, Imports, InstanceFactory};
//!
//! struct Greeter(String);
//! struct GreeterFactory;
//! impl InstanceFactory for GreeterFactory {
//!     type Provides = Greeter;
//!
//!     fn get_imports() -> Vec<ImportInfo> {
//!         vec![ImportInfo::of::<String>("name")]
//!     }
//!
//!     fn construct(&self, imports: &Imports) -> Result<Greeter, DynError> {
//!         Ok(Greeter(format!("Hello {}", imports.get::<String>("name")?)))
//!     }
//! }
//!
//! let container = ContainerBuilder::new()
//!     .add_instance("World".to_string())
//!     .add_factory(GreeterFactory)
//!     .build();
//!
//! let greeter: Arc<Greeter> = container.get_export().unwrap();
//! assert_eq!(greeter.0, "Hello World");
//! ```

mod builder;
mod container;
mod contract;
mod dependency_graph;
mod errors;
mod export;
mod factories;
pub mod formatters;
mod lifetime;
mod operation;
mod promise;
pub mod providers;
mod registry;
mod types;

pub use builder::ContainerBuilder;
pub use container::{CompositionContainer, CompositionContainerInner};
pub use contract::{
    CompositionContract, ContainerKind, ContractShape, ContractType, LazyShape, ManyContainer, ManyShape,
    IMPORT_MANY_CONSTRAINT,
};
pub use errors::{CompositionError, Result};
pub use export::Export;
pub use factories::{FactoryExportDescriptorProvider, ImportInfo, Imports, InstanceFactory, Sharing};
pub use lifetime::{LifetimeContext, SharingId, SharingLock};
pub use operation::{CompositionAction, CompositionOperation, WAVE_WARNING_INTERVAL};
pub use promise::{
    Activator, CompositionDependency, DependencyAccessor, DependencyLister, DependencyTarget, DescriptorFactory,
    ExportDescriptor, ExportDescriptorPromise,
};
pub use providers::{
    instance::InstanceExportDescriptorProvider,
    lazy::{Lazy, LazyExportDescriptorProvider, LazySource, MetadataView},
    many::ImportManyExportDescriptorProvider,
    ExportDescriptorProvider,
};
pub use registry::ExportDescriptorRegistry;
pub use types::{DynError, Injectable, Instance, Metadata, MetadataValue, TypeInfo};
