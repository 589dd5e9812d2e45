use std::{ops::Deref, sync::Arc};

use crate::types::Injectable;

/// A composed value, releasing what was composed along with it once dropped
///
/// Returned by [crate::CompositionContainer::get_scoped_export], where dropping releases the
/// shared instances of the scope the value was composed in.
pub struct Export<T: Injectable> {
    value: Arc<T>,
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<T: Injectable> Export<T> {
    pub fn new<F>(value: Arc<T>, dispose: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Export {
            value,
            dispose: Some(Box::new(dispose)),
        }
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }
}
impl<T: Injectable> Deref for Export<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}
impl<T: Injectable> Drop for Export<T> {
    fn drop(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}
