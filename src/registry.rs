use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{
    config::normalize_instance_name, DurableStorage, Error, ExperimentClient, ExperimentConfig,
    InMemoryStorage, PersistenceBackend, Result, Scheduler,
};

/// HTTP connection pool and scheduler shared by all clients of a [`Registry`].
///
/// Cloning `SharedResources` produces another handle to the same resources.
#[derive(Debug, Clone)]
pub struct SharedResources {
    http_client: reqwest::blocking::Client,
    scheduler: Scheduler,
}

impl SharedResources {
    /// Create a new HTTP client and scheduler.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] if the HTTP client could not be initialized.
    pub fn new() -> Result<SharedResources> {
        Ok(SharedResources {
            http_client: reqwest::blocking::Client::builder().build()?,
            scheduler: Scheduler::new(),
        })
    }

    /// HTTP client shared by all fetches.
    pub fn http_client(&self) -> &reqwest::blocking::Client {
        &self.http_client
    }

    /// Scheduler running fetches and polling timers.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Shut down the scheduler: stop all polling and reject new fetches.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

/// Process-wide table of named [`ExperimentClient`]s.
///
/// Instance names are case-insensitive and the empty name denotes the default instance. Every
/// instance is created once: later [`Registry::init`] calls with the same name return the existing
/// client.
///
/// ```no_run
/// # fn main() -> skylab::Result<()> {
/// use skylab::{ExperimentConfig, Registry};
///
/// let registry = Registry::new()?;
/// let client = registry.init("api-key", ExperimentConfig::new().with_instance_name("checkout"))?;
/// assert!(registry.get_instance("Checkout").is_some());
/// # Ok(())
/// # }
/// ```
pub struct Registry {
    resources: SharedResources,
    persistence: Option<Arc<dyn PersistenceBackend>>,
    instances: Mutex<HashMap<String, ExperimentClient>>,
}

impl Registry {
    /// Create a registry whose clients cache variants in memory only.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] if the HTTP client could not be initialized.
    pub fn new() -> Result<Registry> {
        Ok(Registry::with_resources(SharedResources::new()?))
    }

    /// Create a registry whose clients persist variants in `backend`, so they are available
    /// before the first fetch of the next process.
    ///
    /// # Errors
    ///
    /// [`Error::Network`] if the HTTP client could not be initialized.
    pub fn with_persistence(backend: impl PersistenceBackend + 'static) -> Result<Registry> {
        let mut registry = Registry::new()?;
        registry.persistence = Some(Arc::new(backend));
        Ok(registry)
    }

    /// Create a registry using existing shared resources.
    pub fn with_resources(resources: SharedResources) -> Registry {
        Registry {
            resources,
            persistence: None,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Resources shared by the clients of this registry.
    pub fn resources(&self) -> &SharedResources {
        &self.resources
    }

    /// Get the client named by `config`, creating it if it does not exist yet.
    ///
    /// If the client already exists, `api_key` and `config` are ignored.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ExperimentClient::new`] when creating a client fails. A failed
    /// creation does not register anything, so a later call may retry.
    pub fn init(
        &self,
        api_key: impl Into<String>,
        config: ExperimentConfig,
    ) -> Result<ExperimentClient> {
        let mut instances = self.instances();
        let instance_name = config.instance_name().to_owned();

        if let Some(client) = instances.get(&instance_name) {
            log::debug!(target: "skylab", instance_name = instance_name.as_str(); "client already initialized, ignoring new configuration");
            return Ok(client.clone());
        }

        let client = match &self.persistence {
            Some(backend) => ExperimentClient::new(
                api_key,
                config,
                DurableStorage::open(&instance_name, Arc::clone(backend)),
                &self.resources,
            )?,
            None => ExperimentClient::new(
                api_key,
                config,
                InMemoryStorage::new(),
                &self.resources,
            )?,
        };

        log::info!(target: "skylab", instance_name = instance_name.as_str(); "initialized client");
        instances.insert(instance_name, client.clone());
        Ok(client)
    }

    /// Get the client named `instance_name`, if it has been initialized.
    pub fn get_instance(&self, instance_name: &str) -> Option<ExperimentClient> {
        self.instances()
            .get(&normalize_instance_name(instance_name))
            .cloned()
    }

    /// Get the client named `instance_name`.
    ///
    /// # Errors
    ///
    /// [`Error::UninitializedClient`] if no client with this name has been initialized.
    pub fn get_instance_or_err(&self, instance_name: &str) -> Result<ExperimentClient> {
        self.get_instance(instance_name)
            .ok_or_else(|| Error::UninitializedClient(normalize_instance_name(instance_name)))
    }

    /// Stop polling of all clients and shut down the shared scheduler.
    ///
    /// Clients stay usable for reading cached variants, but fetches complete with
    /// [`Error::Shutdown`].
    pub fn shutdown(&self) {
        for client in self.instances().values() {
            client.stop_polling();
        }
        self.resources.shutdown();
    }

    fn instances(&self) -> MutexGuard<'_, HashMap<String, ExperimentClient>> {
        self.instances
            .lock()
            .expect("thread holding instances lock should not panic")
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("instances", &self.instances().keys().collect::<Vec<_>>())
            .field("persistent", &self.persistence.is_some())
            .finish_non_exhaustive()
    }
}
