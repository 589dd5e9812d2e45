use std::sync::Arc;

use crate::{
    errors::{CompositionError, Result},
    lifetime::{LifetimeContext, SharingLock, SharingLockGuard},
    types::Instance,
};

/// Work scheduled on an operation, receives the operation so it can schedule more
pub type CompositionAction = Box<dyn FnOnce(&mut CompositionOperation) -> Result<()>>;

/// Every this many waves of non-prerequisite actions a warning is logged
pub const WAVE_WARNING_INTERVAL: usize = 1_000;

/// One top-to-bottom activation of an export graph
///
/// Created by [CompositionOperation::run] and dropped once the graph is complete.
/// Bound to the thread it runs on.
pub struct CompositionOperation {
    sharing_lock: Option<(SharingLock, SharingLockGuard)>,
    non_prerequisite_actions: Vec<CompositionAction>,
    post_composition_actions: Vec<CompositionAction>,
    completed: bool,
}

impl CompositionOperation {
    pub(crate) fn new() -> Self {
        CompositionOperation {
            sharing_lock: None,
            non_prerequisite_actions: Vec::new(),
            post_composition_actions: Vec::new(),
            completed: false,
        }
    }

    /// Activates the root within a new operation, then runs every scheduled action
    ///
    /// If the activator fails no scheduled action runs. The sharing lock is released in
    /// either case.
    pub fn run<F>(scope: &LifetimeContext, activator: &F) -> Result<Instance>
    where
        F: Fn(&LifetimeContext, &mut CompositionOperation) -> Result<Instance> + ?Sized,
    {
        let mut operation = CompositionOperation::new();
        let instance = activator(scope, &mut operation)?;
        operation.complete()?;
        Ok(instance)
    }

    /// Schedules wiring which runs once the prerequisites are satisfied
    pub fn add_non_prerequisite_action<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut CompositionOperation) -> Result<()> + 'static,
    {
        if self.completed {
            return Err(CompositionError::InvariantViolation(
                "Action scheduled after the operation has completed.",
            ));
        }
        self.non_prerequisite_actions.push(Box::new(action));
        Ok(())
    }

    /// Schedules a notification which runs once the whole graph has been composed
    pub fn add_post_composition_action<F>(&mut self, action: F) -> Result<()>
    where
        F: FnOnce(&mut CompositionOperation) -> Result<()> + 'static,
    {
        if self.completed {
            return Err(CompositionError::InvariantViolation(
                "Action scheduled after the operation has completed.",
            ));
        }
        self.post_composition_actions.push(Box::new(action));
        Ok(())
    }

    /// Takes the sharing lock for the rest of this operation
    ///
    /// Entering the lock already held is a no-op, entering another one is an error.
    pub fn enter_sharing_lock(&mut self, sharing_lock: &SharingLock) -> Result<()> {
        if let Some((held, _)) = &self.sharing_lock {
            if Arc::ptr_eq(held, sharing_lock) {
                return Ok(());
            }
            return Err(CompositionError::InvariantViolation(
                "Sharing lock already taken in this operation.",
            ));
        }

        let guard = sharing_lock.lock_arc();
        tracing::debug!("Entered sharing lock");
        self.sharing_lock = Some((sharing_lock.clone(), guard));
        Ok(())
    }

    /// Runs the non-prerequisite actions in waves until none are left, then the
    /// post-composition actions
    pub(crate) fn complete(&mut self) -> Result<()> {
        let mut waves = 0_usize;
        while !self.non_prerequisite_actions.is_empty() {
            waves += 1;
            if waves % WAVE_WARNING_INTERVAL == 0 {
                tracing::warn!(
                    "Non-prerequisite actions are still being scheduled after {waves} waves - composition might never finish"
                );
            }

            let wave = std::mem::take(&mut self.non_prerequisite_actions);
            for action in wave {
                action(self)?;
            }
        }

        self.completed = true;
        let post_composition_actions = std::mem::take(&mut self.post_composition_actions);
        tracing::debug!(
            "Composition settled after {waves} waves, running {} post-composition actions",
            post_composition_actions.len()
        );
        for action in post_composition_actions {
            action(self)?;
        }

        Ok(())
    }
}
impl Drop for CompositionOperation {
    fn drop(&mut self) {
        if self.sharing_lock.take().is_some() {
            tracing::debug!("Released sharing lock");
        }
    }
}
