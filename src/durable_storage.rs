//! Variant storage that survives process restarts.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

use crate::{Result, Storage, Variant};

/// Durable key-value backend. Stores string values grouped into namespaces.
///
/// `DurableStorage` keeps an in-memory copy of its namespace, so a backend is only asked to load a
/// namespace once and to store it after every change.
pub trait PersistenceBackend: Send + Sync {
    /// Load all entries of `namespace`. A namespace that was never stored is empty.
    fn load(&self, namespace: &str) -> Result<HashMap<String, String>>;

    /// Replace all entries of `namespace` with `entries`.
    fn store(&self, namespace: &str, entries: &HashMap<String, String>) -> Result<()>;
}

impl<B: PersistenceBackend + ?Sized> PersistenceBackend for std::sync::Arc<B> {
    fn load(&self, namespace: &str) -> Result<HashMap<String, String>> {
        (**self).load(namespace)
    }

    fn store(&self, namespace: &str, entries: &HashMap<String, String>) -> Result<()> {
        (**self).store(namespace, entries)
    }
}

/// Prefix of durable storage namespaces.
pub const STORAGE_NAMESPACE_PREFIX: &str = "skylab-variants";

/// Durable storage namespace for a client instance. Every instance gets its own namespace, so
/// multiple named clients never collide.
pub fn storage_namespace(instance_name: &str) -> String {
    if instance_name.is_empty() {
        STORAGE_NAMESPACE_PREFIX.to_owned()
    } else {
        format!("{STORAGE_NAMESPACE_PREFIX}-{instance_name}")
    }
}

/// [`Storage`] persisting each variant as a JSON string in a [`PersistenceBackend`] namespace.
///
/// Persistence is best-effort: backend failures are logged and never affect the in-memory
/// contents. Entries that cannot be parsed are treated as absent.
pub struct DurableStorage {
    namespace: String,
    backend: Box<dyn PersistenceBackend>,
    entries: HashMap<String, String>,
}

impl DurableStorage {
    /// Open the storage of `instance_name` in `backend`, loading previously persisted variants.
    pub fn open(instance_name: &str, backend: impl PersistenceBackend + 'static) -> DurableStorage {
        DurableStorage::open_boxed(instance_name, Box::new(backend))
    }

    fn open_boxed(
        instance_name: &str,
        backend: Box<dyn PersistenceBackend>,
    ) -> DurableStorage {
        let namespace = storage_namespace(instance_name);
        let entries = backend.load(&namespace).unwrap_or_else(|err| {
            log::warn!(target: "skylab", namespace = namespace.as_str(); "failed to load persisted variants: {:?}", err);
            HashMap::new()
        });
        DurableStorage {
            namespace,
            backend,
            entries,
        }
    }

    fn persist(&self) {
        if let Err(err) = self.backend.store(&self.namespace, &self.entries) {
            log::warn!(target: "skylab", namespace = self.namespace.as_str(); "failed to persist variants: {:?}", err);
        }
    }

    fn parse(key: &str, json: &str) -> Option<Variant> {
        Variant::try_from_json(json)
            .inspect_err(|err| {
                log::debug!(target: "skylab", flag_key = key; "dropping unparseable persisted variant: {:?}", err);
            })
            .ok()
    }
}

impl Storage for DurableStorage {
    fn put(&mut self, key: String, variant: Variant) -> Variant {
        let previous = self.entries.insert(key.clone(), variant.to_json());
        self.persist();
        previous
            .and_then(|json| DurableStorage::parse(&key, &json))
            .unwrap_or_default()
    }

    fn get(&self, key: &str) -> Variant {
        self.entries
            .get(key)
            .and_then(|json| DurableStorage::parse(key, json))
            .unwrap_or_default()
    }

    fn get_all(&self) -> HashMap<String, Variant> {
        self.entries
            .iter()
            .filter_map(|(key, json)| Some((key.clone(), DurableStorage::parse(key, json)?)))
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.persist();
    }

    fn replace_all(&mut self, variants: &HashMap<String, Variant>) {
        self.entries = variants
            .iter()
            .map(|(key, variant)| (key.clone(), variant.to_json()))
            .collect();
        self.persist();
    }
}

/// [`PersistenceBackend`] storing every namespace as a JSON object in `<directory>/<namespace>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    directory: PathBuf,
}

impl FileBackend {
    /// Create a backend storing files in `directory`. The directory is created on first write.
    pub fn new(directory: impl Into<PathBuf>) -> FileBackend {
        FileBackend {
            directory: directory.into(),
        }
    }

    /// Directory this backend stores its files in.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path(&self, namespace: &str) -> PathBuf {
        self.directory.join(format!("{namespace}.json"))
    }
}

impl PersistenceBackend for FileBackend {
    fn load(&self, namespace: &str) -> Result<HashMap<String, String>> {
        let contents = match std::fs::read(self.path(namespace)) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_slice(&contents)?)
    }

    fn store(&self, namespace: &str, entries: &HashMap<String, String>) -> Result<()> {
        std::fs::create_dir_all(&self.directory)?;

        // One temporary file per write, concurrent writers never share it.
        let mut tmp = NamedTempFile::new_in(&self.directory)?;
        serde_json::to_writer(&mut tmp, entries)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path(namespace)).map_err(|err| err.error)?;
        Ok(())
    }
}
