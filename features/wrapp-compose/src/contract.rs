use std::{
    collections::VecDeque,
    fmt::{Debug, Display},
    hash::Hash,
    sync::Arc,
};

use crate::{
    errors::Result,
    formatters::{format_type_name, LIST_SEPARATOR},
    promise::ExportDescriptor,
    providers::lazy::{self, Lazy, LazySource, MetadataView},
    types::{Injectable, Instance, Metadata, MetadataValue, TypeInfo},
};

/// Marks an import as "many"
pub const IMPORT_MANY_CONSTRAINT: &str = "IsImportMany";

/// The type requested by a contract, together with its shape
///
/// Shapes are fixed when the [ContractType] is created, so providers can dispatch on them
/// without knowing the concrete type parameters.
#[derive(Clone)]
pub struct ContractType {
    info: TypeInfo,
    shape: ContractShape,
}

#[derive(Debug, Clone, Copy)]
pub enum ContractShape {
    /// A plain value
    Single,
    /// A collection of every matching export
    Many(ManyShape),
    /// A deferred value with eagerly available metadata
    Lazy(LazyShape),
}

/// Containers accepted for "many" imports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    List,
    Array,
    SharedSlice,
    Deque,
}

#[derive(Debug, Clone, Copy)]
pub struct ManyShape {
    pub container: ContainerKind,
    pub element: TypeInfo,
    pub(crate) element_type: fn() -> ContractType,
    pub(crate) collect: fn(Vec<Instance>) -> Result<Instance>,
}
impl ManyShape {
    /// The contract type every element is requested as, shape included
    pub fn element_type(&self) -> ContractType {
        (self.element_type)()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LazyShape {
    pub value: TypeInfo,
    pub metadata_view: TypeInfo,
    pub(crate) build: fn(LazySource) -> Result<ExportDescriptor>,
}
impl LazyShape {
    pub fn value_type(&self) -> ContractType {
        ContractType::from_info(self.value)
    }
}

/// A container that can be filled with every export of its element type
pub trait ManyContainer: Injectable + Sized {
    type Element: Injectable;
    const KIND: ContainerKind;

    fn element_type() -> ContractType {
        ContractType::of::<Self::Element>()
    }

    fn from_elements(elements: Vec<Arc<Self::Element>>) -> Self;
}
impl<T: Injectable> ManyContainer for Vec<Arc<T>> {
    type Element = T;
    const KIND: ContainerKind = ContainerKind::List;

    fn from_elements(elements: Vec<Arc<T>>) -> Self {
        elements
    }
}
impl<T: Injectable> ManyContainer for Box<[Arc<T>]> {
    type Element = T;
    const KIND: ContainerKind = ContainerKind::Array;

    fn from_elements(elements: Vec<Arc<T>>) -> Self {
        elements.into_boxed_slice()
    }
}
impl<T: Injectable> ManyContainer for Arc<[Arc<T>]> {
    type Element = T;
    const KIND: ContainerKind = ContainerKind::SharedSlice;

    fn from_elements(elements: Vec<Arc<T>>) -> Self {
        elements.into()
    }
}
impl<T: Injectable> ManyContainer for VecDeque<Arc<T>> {
    type Element = T;
    const KIND: ContainerKind = ContainerKind::Deque;

    fn from_elements(elements: Vec<Arc<T>>) -> Self {
        elements.into()
    }
}

/// Every export of T, each behind its own [Lazy]
impl<T: Injectable, M: MetadataView> ManyContainer for Vec<Lazy<T, M>> {
    type Element = Lazy<T, M>;
    const KIND: ContainerKind = ContainerKind::List;

    fn element_type() -> ContractType {
        ContractType::lazy::<T, M>()
    }

    fn from_elements(elements: Vec<Arc<Lazy<T, M>>>) -> Self {
        elements.iter().map(|lazy| (**lazy).clone()).collect()
    }
}

fn collect_into<C: ManyContainer>(items: Vec<Instance>) -> Result<Instance> {
    let elements = items
        .iter()
        .map(Instance::downcast::<C::Element>)
        .collect::<Result<Vec<_>>>()?;
    Ok(Instance::new(C::from_elements(elements)))
}

impl ContractType {
    /// A plain value of type T
    pub fn of<T: Injectable>() -> Self {
        Self::from_info(TypeInfo::of::<T>())
    }

    pub fn from_info(info: TypeInfo) -> Self {
        ContractType {
            info,
            shape: ContractShape::Single,
        }
    }

    /// Every export of the container's element type
    pub fn many<C: ManyContainer>() -> Self {
        ContractType {
            info: TypeInfo::of::<C>(),
            shape: ContractShape::Many(ManyShape {
                container: C::KIND,
                element: TypeInfo::of::<C::Element>(),
                element_type: C::element_type,
                collect: collect_into::<C>,
            }),
        }
    }

    /// A [Lazy] value of T, exposing metadata as M
    pub fn lazy<T: Injectable, M: MetadataView>() -> Self {
        ContractType {
            info: TypeInfo::of::<Lazy<T, M>>(),
            shape: ContractShape::Lazy(LazyShape {
                value: TypeInfo::of::<T>(),
                metadata_view: TypeInfo::of::<M>(),
                build: lazy::build_descriptor::<T, M>,
            }),
        }
    }

    pub fn info(&self) -> TypeInfo {
        self.info
    }

    pub fn type_name(&self) -> &'static str {
        self.info.type_name
    }

    pub fn shape(&self) -> &ContractShape {
        &self.shape
    }
}
// The shape is derived from the type, so identity is the type alone
impl PartialEq for ContractType {
    fn eq(&self, other: &Self) -> bool {
        self.info == other.info
    }
}
impl Eq for ContractType {}
impl Hash for ContractType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.info.hash(state);
    }
}
impl Debug for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContractType")
            .field("type_name", &self.info.type_name)
            .field("shape", &self.shape)
            .finish()
    }
}
impl Display for ContractType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_type_name(self.info.type_name))
    }
}

/// The identity of something requested: a type, an optional name and required metadata
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompositionContract {
    contract_type: ContractType,
    contract_name: Option<String>,
    constraints: Metadata,
}

impl CompositionContract {
    pub fn new(contract_type: ContractType) -> Self {
        CompositionContract {
            contract_type,
            contract_name: None,
            constraints: Metadata::new(),
        }
    }

    pub fn of<T: Injectable>() -> Self {
        Self::new(ContractType::of::<T>())
    }

    /// Every export of the container's element type, flagged as "many"
    pub fn many<C: ManyContainer>() -> Self {
        Self::new(ContractType::many::<C>()).with_constraint(IMPORT_MANY_CONSTRAINT, true)
    }

    pub fn lazy<T: Injectable, M: MetadataView>() -> Self {
        Self::new(ContractType::lazy::<T, M>())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.contract_name = Some(name.into());
        self
    }

    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.constraints.insert(key.into(), value.into());
        self
    }

    pub fn contract_type(&self) -> &ContractType {
        &self.contract_type
    }

    pub fn contract_name(&self) -> Option<&str> {
        self.contract_name.as_deref()
    }

    pub fn constraints(&self) -> &Metadata {
        &self.constraints
    }

    /// Strips a boolean constraint, returning its value and the remaining contract
    ///
    /// Returns None if the constraint is absent or not a boolean.
    pub fn try_unwrap_bool_constraint(&self, name: &str) -> Option<(bool, CompositionContract)> {
        let value = self.constraints.get(name)?.as_bool()?;

        let mut constraints = self.constraints.clone();
        constraints.remove(name);

        Some((
            value,
            CompositionContract {
                contract_type: self.contract_type.clone(),
                contract_name: self.contract_name.clone(),
                constraints,
            },
        ))
    }

    /// The same name and constraints, for another type
    pub fn change_type(&self, contract_type: ContractType) -> CompositionContract {
        CompositionContract {
            contract_type,
            contract_name: self.contract_name.clone(),
            constraints: self.constraints.clone(),
        }
    }

    /// Whether the export metadata carries every required constraint value
    pub fn is_satisfied_by(&self, metadata: &Metadata) -> bool {
        self.constraints
            .iter()
            .all(|(key, required)| metadata.get(key) == Some(required))
    }
}
impl Display for CompositionContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.contract_type)?;
        if let Some(name) = &self.contract_name {
            write!(f, " \"{name}\"")?;
        }
        if !self.constraints.is_empty() {
            let constraints: Vec<String> = self
                .constraints
                .iter()
                .map(|(key, value)| format!("{key} = {value}"))
                .collect();
            write!(f, " {{ {} }}", constraints.join(LIST_SEPARATOR))?;
        }
        Ok(())
    }
}
