use std::{
    any::{Any, TypeId},
    collections::BTreeMap,
    fmt::Debug,
    sync::Arc,
};

use crate::errors::{CompositionError, Result};

/// Boxed error returned by user code, must be shareable between threads
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Lazy values may be forced on any thread, so anything composed
/// needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// An activated export
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub instance: Arc<dyn Any + Send + Sync + 'static>,
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance,
        }
    }

    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>> {
        Arc::downcast::<T>(self.instance.clone()).map_err(|_| CompositionError::DowncastFailed {
            required_type: std::any::type_name::<T>(),
            actual_type: self.info.type_name,
        })
    }
}
impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.info.type_name).finish()
    }
}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Metadata attached to an export, and required by contract constraints
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A single metadata or constraint value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<MetadataValue>),
}
impl MetadataValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}
impl std::fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataValue::Bool(value) => write!(f, "{value}"),
            MetadataValue::Int(value) => write!(f, "{value}"),
            MetadataValue::Str(value) => write!(f, "\"{value}\""),
            MetadataValue::List(values) => {
                let items: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}
impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}
impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}
impl From<i32> for MetadataValue {
    fn from(value: i32) -> Self {
        MetadataValue::Int(value.into())
    }
}
impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Str(value.to_string())
    }
}
impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Str(value)
    }
}
impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(values: Vec<T>) -> Self {
        MetadataValue::List(values.into_iter().map(Into::into).collect())
    }
}
