use std::{
    fmt::Debug,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;

use crate::{
    contract::CompositionContract,
    errors::{CompositionError, Result},
    formatters::readable_list,
    lifetime::LifetimeContext,
    operation::CompositionOperation,
    types::{Instance, Metadata},
};

/// Creates an instance of an export within a scope, as part of an operation
pub type Activator =
    Arc<dyn Fn(&LifetimeContext, &mut CompositionOperation) -> Result<Instance> + Send + Sync>;

/// Lists the dependencies of a promise, called at most once
pub type DependencyLister =
    Box<dyn FnOnce(&dyn DependencyAccessor) -> Result<Vec<CompositionDependency>> + Send>;

/// Builds the descriptor of a promise from its dependencies, called at most once
pub type DescriptorFactory =
    Box<dyn FnOnce(&[CompositionDependency]) -> Result<ExportDescriptor> + Send>;

/// The realized production unit of a promise
#[derive(Clone)]
pub struct ExportDescriptor {
    activator: Activator,
    metadata: Arc<Metadata>,
}

impl ExportDescriptor {
    pub fn new<F>(activator: F, metadata: impl Into<Arc<Metadata>>) -> Self
    where
        F: Fn(&LifetimeContext, &mut CompositionOperation) -> Result<Instance> + Send + Sync + 'static,
    {
        Self::from_activator(Arc::new(activator), metadata)
    }

    pub fn from_activator(activator: Activator, metadata: impl Into<Arc<Metadata>>) -> Self {
        ExportDescriptor {
            activator,
            metadata: metadata.into(),
        }
    }

    pub fn activator(&self) -> &Activator {
        &self.activator
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn activate(&self, scope: &LifetimeContext, operation: &mut CompositionOperation) -> Result<Instance> {
        (self.activator)(scope, operation)
    }

    /// Whether both descriptors share the same activator
    pub fn ptr_eq(&self, other: &ExportDescriptor) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.activator), Arc::as_ptr(&other.activator))
    }

    /// A descriptor standing in for a promise which is still being built
    ///
    /// The real descriptor is looked up when the export is activated, which is after the
    /// build has finished. Metadata of the target is not available through it.
    pub(crate) fn cycle_breaking(target: Weak<ExportDescriptorPromise>) -> Self {
        ExportDescriptor::new(
            move |scope, operation| {
                let promise = target.upgrade().ok_or(CompositionError::InvariantViolation(
                    "Export descriptor promise was dropped while still referenced.",
                ))?;
                promise.get_descriptor()?.activate(scope, operation)
            },
            Metadata::new(),
        )
    }
}
impl Debug for ExportDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportDescriptor")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// What a dependency resolved to
#[derive(Clone)]
pub enum DependencyTarget {
    Satisfied(Weak<ExportDescriptorPromise>),
    /// Nothing matched the contract
    Missing,
    /// More than one promise matched, holds their origins
    Oversupplied(Vec<String>),
}

/// An edge discovered while declaring the dependencies of a promise
#[derive(Clone)]
pub struct CompositionDependency {
    contract: CompositionContract,
    site: String,
    is_prerequisite: bool,
    target: DependencyTarget,
}

impl CompositionDependency {
    pub fn satisfied(
        site: impl Into<String>,
        contract: CompositionContract,
        target: &Arc<ExportDescriptorPromise>,
        is_prerequisite: bool,
    ) -> Self {
        CompositionDependency {
            contract,
            site: site.into(),
            is_prerequisite,
            target: DependencyTarget::Satisfied(Arc::downgrade(target)),
        }
    }

    pub fn missing(site: impl Into<String>, contract: CompositionContract, is_prerequisite: bool) -> Self {
        CompositionDependency {
            contract,
            site: site.into(),
            is_prerequisite,
            target: DependencyTarget::Missing,
        }
    }

    pub fn oversupplied(
        site: impl Into<String>,
        contract: CompositionContract,
        targets: &[Arc<ExportDescriptorPromise>],
        is_prerequisite: bool,
    ) -> Self {
        CompositionDependency {
            contract,
            site: site.into(),
            is_prerequisite,
            target: DependencyTarget::Oversupplied(
                targets.iter().map(|target| target.origin().to_string()).collect(),
            ),
        }
    }

    pub fn contract(&self) -> &CompositionContract {
        &self.contract
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn is_prerequisite(&self) -> bool {
        self.is_prerequisite
    }

    pub fn target(&self) -> &DependencyTarget {
        &self.target
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.target, DependencyTarget::Missing)
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self.target, DependencyTarget::Satisfied(_))
    }

    /// The promise satisfying this dependency
    pub fn target_promise(&self) -> Result<Arc<ExportDescriptorPromise>> {
        match &self.target {
            DependencyTarget::Satisfied(target) => target.upgrade().ok_or(
                CompositionError::InvariantViolation("Export descriptor promise was dropped while still referenced."),
            ),
            DependencyTarget::Missing => Err(CompositionError::NoExport {
                contract: self.contract.to_string(),
            }),
            DependencyTarget::Oversupplied(origins) => Err(CompositionError::AmbiguousMatch {
                contract: self.contract.to_string(),
                origins: readable_list(origins),
            }),
        }
    }

    /// Builds the descriptor of the target
    ///
    /// If the target is already being built further up this thread, the cycle is broken
    /// with a descriptor that looks the target up on activation. Cycles made only of
    /// prerequisite edges can't be broken and fail with [CompositionError::CyclicDependency].
    pub fn get_descriptor(&self) -> Result<ExportDescriptor> {
        let target = self.target_promise()?;

        if target.is_building() {
            let key = target.key();
            if build_path::closes_through_prerequisites(key, self.is_prerequisite) {
                return Err(CompositionError::CyclicDependency {
                    chain: build_path::chain_to(key, target.origin()),
                });
            }

            tracing::debug!("Breaking cycle at '{}' through '{}'", self.site, target.origin());
            return Ok(ExportDescriptor::cycle_breaking(Arc::downgrade(&target)));
        }

        target.build(self.is_prerequisite)
    }
}
impl Debug for CompositionDependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target = match &self.target {
            DependencyTarget::Satisfied(target) => match target.upgrade() {
                Some(promise) => promise.origin().to_string(),
                None => "<dropped>".to_string(),
            },
            DependencyTarget::Missing => "<missing>".to_string(),
            DependencyTarget::Oversupplied(origins) => format!("<oversupplied: {}>", readable_list(origins)),
        };
        f.debug_struct("CompositionDependency")
            .field("site", &self.site)
            .field("contract", &self.contract.to_string())
            .field("is_prerequisite", &self.is_prerequisite)
            .field("target", &target)
            .finish()
    }
}

enum Stage<T, F> {
    Pending(F),
    InProgress,
    Ready(T),
    Failed(CompositionError),
}

/// Runs the pending function once, and returns its memoized result on later calls
fn memoize<T: Clone, F>(
    stage: &Mutex<Stage<T, F>>,
    on_reentry: impl FnOnce() -> CompositionError,
    run: impl FnOnce(F) -> Result<T>,
) -> Result<T> {
    let pending = {
        let mut stage = stage.lock();
        match &*stage {
            Stage::Ready(value) => return Ok(value.clone()),
            Stage::Failed(error) => return Err(error.clone()),
            Stage::InProgress => return Err(on_reentry()),
            Stage::Pending(_) => {}
        }
        match std::mem::replace(&mut *stage, Stage::InProgress) {
            Stage::Pending(pending) => pending,
            _ => unreachable!("stage was checked to be pending"),
        }
    };

    let result = run(pending);
    *stage.lock() = match &result {
        Ok(value) => Stage::Ready(value.clone()),
        Err(error) => Stage::Failed(error.clone()),
    };
    result
}

/// A deferred production plan for one contract
///
/// Declaring lists the dependencies without building anything, building turns them into an
/// [ExportDescriptor]. Each happens at most once, failures included.
pub struct ExportDescriptorPromise {
    contract: CompositionContract,
    origin: String,
    is_shared: bool,
    dependencies: Mutex<Stage<Arc<[CompositionDependency]>, DependencyLister>>,
    descriptor: Mutex<Stage<ExportDescriptor, DescriptorFactory>>,
}

impl ExportDescriptorPromise {
    pub fn new<L, F>(
        contract: CompositionContract,
        origin: impl Into<String>,
        is_shared: bool,
        dependency_lister: L,
        descriptor_factory: F,
    ) -> Self
    where
        L: FnOnce(&dyn DependencyAccessor) -> Result<Vec<CompositionDependency>> + Send + 'static,
        F: FnOnce(&[CompositionDependency]) -> Result<ExportDescriptor> + Send + 'static,
    {
        ExportDescriptorPromise {
            contract,
            origin: origin.into(),
            is_shared,
            dependencies: Mutex::new(Stage::Pending(Box::new(dependency_lister))),
            descriptor: Mutex::new(Stage::Pending(Box::new(descriptor_factory))),
        }
    }

    /// A promise without dependencies
    pub fn without_dependencies<F>(
        contract: CompositionContract,
        origin: impl Into<String>,
        is_shared: bool,
        descriptor_factory: F,
    ) -> Self
    where
        F: FnOnce(&[CompositionDependency]) -> Result<ExportDescriptor> + Send + 'static,
    {
        Self::new(contract, origin, is_shared, |_| Ok(Vec::new()), descriptor_factory)
    }

    pub fn contract(&self) -> &CompositionContract {
        &self.contract
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    /// Declares the dependencies of this promise
    pub fn dependencies(&self, accessor: &dyn DependencyAccessor) -> Result<Arc<[CompositionDependency]>> {
        memoize(
            &self.dependencies,
            || CompositionError::InvariantViolation("Dependencies were requested while being listed."),
            |lister| lister(accessor).map(Arc::from),
        )
    }

    /// The declared dependencies, if they have been declared already
    pub fn declared_dependencies(&self) -> Result<Arc<[CompositionDependency]>> {
        match &*self.dependencies.lock() {
            Stage::Ready(dependencies) => Ok(dependencies.clone()),
            Stage::Failed(error) => Err(error.clone()),
            Stage::Pending(_) | Stage::InProgress => Err(CompositionError::InvariantViolation(
                "Descriptor requested before the dependencies were declared.",
            )),
        }
    }

    /// Builds the descriptor of this promise
    ///
    /// The dependencies have to be declared first.
    pub fn get_descriptor(&self) -> Result<ExportDescriptor> {
        self.build(true)
    }

    /// Whether the descriptor is being built right now
    pub fn is_building(&self) -> bool {
        matches!(&*self.descriptor.lock(), Stage::InProgress)
    }

    pub(crate) fn build(&self, prerequisite: bool) -> Result<ExportDescriptor> {
        let key = self.key();
        memoize(
            &self.descriptor,
            || CompositionError::CyclicDependency {
                chain: build_path::chain_to(key, &self.origin),
            },
            |factory| {
                let dependencies = self.declared_dependencies()?;
                let _step = build_path::enter(key, &self.origin, prerequisite);

                tracing::debug!("Building export descriptor of '{}'", self.origin);
                factory(&dependencies)
            },
        )
    }

    fn key(&self) -> usize {
        self as *const ExportDescriptorPromise as usize
    }
}
impl Debug for ExportDescriptorPromise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportDescriptorPromise")
            .field("contract", &self.contract.to_string())
            .field("origin", &self.origin)
            .field("is_shared", &self.is_shared)
            .finish_non_exhaustive()
    }
}

/// Locates promises for the dependencies of a promise, never activates anything
pub trait DependencyAccessor {
    /// Every promise matching the contract, in discovery order
    fn get_promises(&self, contract: &CompositionContract) -> Result<Arc<[Arc<ExportDescriptorPromise>]>>;

    /// Zero or more dependencies, one per matching promise
    fn resolve_dependencies(
        &self,
        site: &str,
        contract: &CompositionContract,
        is_prerequisite: bool,
    ) -> Result<Vec<CompositionDependency>> {
        Ok(self
            .get_promises(contract)?
            .iter()
            .map(|promise| CompositionDependency::satisfied(site, contract.clone(), promise, is_prerequisite))
            .collect())
    }

    /// Exactly one dependency, or None if nothing matches
    ///
    /// More than one match yields an oversupplied dependency, reported when the graph is checked.
    fn try_resolve_optional_dependency(
        &self,
        site: &str,
        contract: &CompositionContract,
        is_prerequisite: bool,
    ) -> Result<Option<CompositionDependency>> {
        let promises = self.get_promises(contract)?;
        let dependency = match &promises[..] {
            [] => None,
            [promise] => Some(CompositionDependency::satisfied(site, contract.clone(), promise, is_prerequisite)),
            promises => Some(CompositionDependency::oversupplied(
                site,
                contract.clone(),
                promises,
                is_prerequisite,
            )),
        };
        Ok(dependency)
    }

    /// Exactly one dependency, a missing one is reported when the graph is checked
    fn resolve_required_dependency(
        &self,
        site: &str,
        contract: &CompositionContract,
        is_prerequisite: bool,
    ) -> Result<CompositionDependency> {
        Ok(self
            .try_resolve_optional_dependency(site, contract, is_prerequisite)?
            .unwrap_or_else(|| CompositionDependency::missing(site, contract.clone(), is_prerequisite)))
    }
}

/// Promises currently being built on this thread, outermost first
mod build_path {
    use std::cell::RefCell;

    struct Step {
        key: usize,
        origin: String,
        prerequisite: bool,
    }

    thread_local! {
        static BUILD_PATH: RefCell<Vec<Step>> = const { RefCell::new(Vec::new()) };
    }

    pub(super) struct StepGuard;
    impl Drop for StepGuard {
        fn drop(&mut self) {
            BUILD_PATH.with_borrow_mut(|path| path.pop());
        }
    }

    /// Records that a promise is being built, entered through a (non-)prerequisite edge
    pub(super) fn enter(key: usize, origin: &str, prerequisite: bool) -> StepGuard {
        BUILD_PATH.with_borrow_mut(|path| {
            path.push(Step {
                key,
                origin: origin.to_string(),
                prerequisite,
            })
        });
        StepGuard
    }

    /// Whether every edge from the promise back to itself is a prerequisite
    pub(super) fn closes_through_prerequisites(key: usize, closing_edge_prerequisite: bool) -> bool {
        if !closing_edge_prerequisite {
            return false;
        }
        BUILD_PATH.with_borrow(|path| match path.iter().rposition(|step| step.key == key) {
            Some(start) => path[start + 1..].iter().all(|step| step.prerequisite),
            None => true,
        })
    }

    /// Origins from the promise back to itself
    pub(super) fn chain_to(key: usize, origin: &str) -> Vec<String> {
        BUILD_PATH.with_borrow(|path| {
            let start = path.iter().rposition(|step| step.key == key).unwrap_or(path.len());
            let mut chain: Vec<String> = path[start..].iter().map(|step| step.origin.clone()).collect();
            chain.push(origin.to_string());
            chain
        })
    }
}
