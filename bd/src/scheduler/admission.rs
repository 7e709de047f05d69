//! Admission registry: outstanding execution groups per business application

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::domain::ExecutionGroup;

/// Tracks the scheduled, unfinished execution groups of each business application
///
/// All operations run under one lock, so each call is linearizable with respect
/// to the others.
#[derive(Debug, Default)]
pub struct AdmissionRegistry {
    groups: Mutex<HashMap<String, HashMap<String, Arc<ExecutionGroup>>>>,
}

impl AdmissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashMap<String, Arc<ExecutionGroup>>>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of non-cancelled groups for an application, purging cancelled ones
    pub fn scheduled_count(&self, application: &str) -> usize {
        let mut groups = self.lock();
        let Some(app_groups) = groups.get_mut(application) else {
            return 0;
        };
        app_groups.retain(|_, group| !group.is_cancelled());
        let count = app_groups.len();
        if count == 0 {
            groups.remove(application);
        }
        count
    }

    /// Register a group; returns false when the group was already cancelled
    pub fn add(&self, group: Arc<ExecutionGroup>) -> bool {
        if group.is_cancelled() {
            debug!(group_id = %group.id(), "AdmissionRegistry::add: group cancelled, skipping");
            return false;
        }
        self.lock()
            .entry(group.application_name().to_string())
            .or_default()
            .insert(group.base_id().to_string(), group);
        true
    }

    /// Remove a group; retries keep the base id so any attempt matches
    pub fn remove(&self, group: &ExecutionGroup) -> bool {
        let mut groups = self.lock();
        let Some(app_groups) = groups.get_mut(group.application_name()) else {
            return false;
        };
        let removed = app_groups.remove(group.base_id()).is_some();
        if app_groups.is_empty() {
            groups.remove(group.application_name());
        }
        removed
    }

    /// Drop every group for an application, returning them
    pub fn clear(&self, application: &str) -> Vec<Arc<ExecutionGroup>> {
        debug!(%application, "AdmissionRegistry::clear: called");
        self.lock()
            .remove(application)
            .map(|groups| groups.into_values().collect())
            .unwrap_or_default()
    }

    /// Groups registered across all applications, cancelled or not
    pub(crate) fn total(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }
}
