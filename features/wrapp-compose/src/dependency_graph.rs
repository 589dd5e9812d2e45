use std::{collections::HashSet, sync::Arc};

use crate::{
    errors::{CompositionError, Result},
    formatters::readable_list,
    promise::{DependencyAccessor, DependencyTarget, ExportDescriptorPromise},
};

/// Declares every promise reachable from a root and validates the resulting graph
///
/// Reports missing and oversupplied dependencies, and cycles made only of prerequisites.
/// Nothing is built while walking.
pub(crate) struct DependencyGraph<'a> {
    accessor: &'a dyn DependencyAccessor,
    checked: HashSet<usize>,
    errors: Vec<CompositionError>,
}

impl<'a> DependencyGraph<'a> {
    pub(crate) fn new(accessor: &'a dyn DependencyAccessor) -> Self {
        DependencyGraph {
            accessor,
            checked: HashSet::new(),
            errors: Vec::new(),
        }
    }

    /// Validate the graph below the root
    ///
    /// Every issue is logged, the first one is returned
    pub(crate) fn check(mut self, root: &Arc<ExportDescriptorPromise>) -> Result<()> {
        let mut dependency_chain = Vec::new();
        self.check_recurse(root, &mut dependency_chain);

        let Some(first) = self.errors.first().cloned() else {
            return Ok(());
        };
        for error in &self.errors {
            tracing::error!("Invalid composition below '{}': {error}", root.origin());
        }
        Err(first)
    }

    fn check_recurse(&mut self, promise: &Arc<ExportDescriptorPromise>, dependency_chain: &mut Vec<(usize, String)>) {
        let key = Arc::as_ptr(promise) as usize;

        // Circular Dependency Check
        if let Some(start) = dependency_chain.iter().position(|(entry, _)| *entry == key) {
            let mut chain: Vec<String> = dependency_chain[start..]
                .iter()
                .map(|(_, origin)| origin.clone())
                .collect();
            chain.push(promise.origin().to_string()); // Add current so chain is complete

            self.errors.push(CompositionError::CyclicDependency { chain });
            return;
        }

        // Skip other checks if already checked
        if !self.checked.insert(key) {
            return;
        }

        let dependencies = match promise.dependencies(self.accessor) {
            Ok(dependencies) => dependencies,
            Err(error) => {
                self.errors.push(error);
                return;
            }
        };

        dependency_chain.push((key, promise.origin().to_string()));

        for dependency in dependencies.iter() {
            match dependency.target() {
                DependencyTarget::Missing => self.errors.push(CompositionError::MissingDependency {
                    site: dependency.site().to_string(),
                    contract: dependency.contract().to_string(),
                    required_by: promise.origin().to_string(),
                }),
                DependencyTarget::Oversupplied(origins) => self.errors.push(CompositionError::AmbiguousMatch {
                    contract: dependency.contract().to_string(),
                    origins: readable_list(origins),
                }),
                DependencyTarget::Satisfied(_) => {
                    let target = match dependency.target_promise() {
                        Ok(target) => target,
                        Err(error) => {
                            self.errors.push(error);
                            continue;
                        }
                    };

                    if dependency.is_prerequisite() {
                        self.check_recurse(&target, dependency_chain);
                    } else {
                        // Deferred edges break cycles, the target starts its own chain
                        self.check_recurse(&target, &mut Vec::new());
                    }
                }
            }
        }

        dependency_chain.pop();
    }
}
