//! Business applications and the modules hosting them

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::ApplicationConfig;

/// A loadable unit of handler code
#[derive(Debug)]
pub struct Module {
    name: String,
    started: AtomicBool,
    /// Millis since the epoch of the last start, 0 when never started
    start_time_ms: AtomicI64,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started: AtomicBool::new(false),
            start_time_ms: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Mark the module started
    pub fn start(&self) {
        info!(module = %self.name, "Module started");
        self.start_time_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
    }

    /// Mark the module stopped
    pub fn stop(&self) {
        info!(module = %self.name, "Module stopped");
        self.started.store(false, Ordering::SeqCst);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// When the module was last started
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        match self.start_time_ms.load(Ordering::SeqCst) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }
}

/// A registered handler type with a concurrency ceiling
#[derive(Debug)]
pub struct BusinessApplication {
    name: String,
    max_concurrent_requests: AtomicUsize,
    max_requests_per_group: usize,
    module: Arc<Module>,
}

impl BusinessApplication {
    pub fn new(
        name: impl Into<String>,
        module: Arc<Module>,
        max_concurrent_requests: usize,
        max_requests_per_group: usize,
    ) -> Self {
        Self {
            name: name.into(),
            max_concurrent_requests: AtomicUsize::new(max_concurrent_requests),
            max_requests_per_group: max_requests_per_group.max(1),
            module,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Admission ceiling: outstanding groups allowed at once
    pub fn max_concurrent_requests(&self) -> usize {
        self.max_concurrent_requests.load(Ordering::SeqCst)
    }

    pub fn set_max_concurrent_requests(&self, max: usize) {
        debug!(application = %self.name, max, "set_max_concurrent_requests: called");
        self.max_concurrent_requests.store(max, Ordering::SeqCst);
    }

    /// Requests carved into one execution group
    pub fn max_requests_per_group(&self) -> usize {
        self.max_requests_per_group
    }

    pub fn module(&self) -> &Arc<Module> {
        &self.module
    }
}

/// Lookup of business applications by name
pub trait ApplicationRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Arc<BusinessApplication>>;
}

/// In-memory application registry
#[derive(Debug, Default)]
pub struct StaticApplicationRegistry {
    applications: RwLock<HashMap<String, Arc<BusinessApplication>>>,
}

impl StaticApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration, sharing modules by name
    ///
    /// Modules start stopped; call [`start_all`](Self::start_all) once wiring is done.
    pub fn from_config(applications: &[ApplicationConfig]) -> Self {
        debug!(count = applications.len(), "StaticApplicationRegistry::from_config: called");
        let registry = Self::new();
        let mut modules: HashMap<String, Arc<Module>> = HashMap::new();
        for app in applications {
            let module_name = app.module.clone().unwrap_or_else(|| app.name.clone());
            let module = modules
                .entry(module_name.clone())
                .or_insert_with(|| Arc::new(Module::new(module_name)))
                .clone();
            registry.register(BusinessApplication::new(
                app.name.clone(),
                module,
                app.max_concurrent_requests,
                app.max_requests_per_group,
            ));
        }
        registry
    }

    /// Register (or replace) an application
    pub fn register(&self, application: BusinessApplication) -> Arc<BusinessApplication> {
        info!(application = %application.name(), module = %application.module().name(), "Registering application");
        let application = Arc::new(application);
        self.applications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(application.name().to_string(), application.clone());
        application
    }

    /// Remove an application
    pub fn unregister(&self, name: &str) -> Option<Arc<BusinessApplication>> {
        info!(application = %name, "Unregistering application");
        self.applications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Sorted application names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Start every registered application's module
    pub fn start_all(&self) {
        for application in self.applications.read().unwrap_or_else(PoisonError::into_inner).values() {
            if !application.module().is_started() {
                application.module().start();
            }
        }
    }
}

impl ApplicationRegistry for StaticApplicationRegistry {
    fn lookup(&self, name: &str) -> Option<Arc<BusinessApplication>> {
        self.applications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}
