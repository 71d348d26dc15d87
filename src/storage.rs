//! Variant storage. [`VariantCache`] provides concurrent access for readers (variant lookups) and
//! writers (fetch responses) on top of a [`Storage`] implementation.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use crate::Variant;

/// Key-value storage of variants by flag key.
///
/// Implementations do not need to be synchronized: [`VariantCache`] serializes all access.
pub trait Storage: Send {
    /// Store `variant` under `key`, returning the previous variant (empty if there was none).
    fn put(&mut self, key: String, variant: Variant) -> Variant;

    /// Get the variant stored under `key`. Returns an empty variant if there is none.
    fn get(&self, key: &str) -> Variant;

    /// Get a copy of all stored variants.
    fn get_all(&self) -> HashMap<String, Variant>;

    /// Remove all variants.
    fn clear(&mut self);

    /// Replace all variants with `variants`.
    fn replace_all(&mut self, variants: &HashMap<String, Variant>) {
        self.clear();
        for (key, variant) in variants {
            self.put(key.clone(), variant.clone());
        }
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn put(&mut self, key: String, variant: Variant) -> Variant {
        (**self).put(key, variant)
    }

    fn get(&self, key: &str) -> Variant {
        (**self).get(key)
    }

    fn get_all(&self) -> HashMap<String, Variant> {
        (**self).get_all()
    }

    fn clear(&mut self) {
        (**self).clear()
    }

    fn replace_all(&mut self, variants: &HashMap<String, Variant>) {
        (**self).replace_all(variants)
    }
}

/// Volatile in-process storage.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    variants: HashMap<String, Variant>,
}

impl InMemoryStorage {
    /// Create an empty storage.
    pub fn new() -> InMemoryStorage {
        InMemoryStorage::default()
    }
}

impl Storage for InMemoryStorage {
    fn put(&mut self, key: String, variant: Variant) -> Variant {
        self.variants.insert(key, variant).unwrap_or_default()
    }

    fn get(&self, key: &str) -> Variant {
        self.variants.get(key).cloned().unwrap_or_default()
    }

    fn get_all(&self) -> HashMap<String, Variant> {
        self.variants.clone()
    }

    fn clear(&mut self) {
        self.variants.clear();
    }
}

/// Thread-safe variant cache of a single client.
///
/// A single lock guards the underlying storage. Replacing the cache contents with a fetch response
/// happens under one acquisition of that lock, so readers observe either the complete previous set
/// of variants or the complete new one.
pub struct VariantCache {
    storage: Mutex<Box<dyn Storage>>,
}

impl VariantCache {
    /// Create a cache on top of `storage`.
    pub fn new(storage: impl Storage + 'static) -> VariantCache {
        VariantCache {
            storage: Mutex::new(Box::new(storage)),
        }
    }

    /// Get the variant for `key`. Returns an empty variant if there is none.
    pub fn get(&self, key: &str) -> Variant {
        self.lock().get(key)
    }

    /// Get a snapshot of all cached variants. The snapshot is not affected by later updates.
    pub fn get_all(&self) -> HashMap<String, Variant> {
        self.lock().get_all()
    }

    /// Remove all variants.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Atomically replace all cached variants with `variants`.
    pub fn replace_all(&self, variants: &HashMap<String, Variant>) {
        self.lock().replace_all(variants);
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Storage>> {
        // lock() should always return Ok(). Err() is possible only if the lock is poisoned (a
        // storage implementation panicked while holding the lock), which should never happen.
        self.storage
            .lock()
            .expect("thread holding variant storage lock should not panic")
    }
}

impl std::fmt::Debug for VariantCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariantCache").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use super::{InMemoryStorage, Storage, VariantCache};
    use crate::Variant;

    #[test]
    fn in_memory_put_returns_previous_value() {
        let mut storage = InMemoryStorage::new();

        assert!(storage.put("flag".to_owned(), Variant::new("a")).is_empty());
        assert_eq!(
            storage.put("flag".to_owned(), Variant::new("b")),
            Variant::new("a")
        );
        assert_eq!(storage.get("flag"), Variant::new("b"));
    }

    #[test]
    fn in_memory_get_missing_is_empty() {
        let storage = InMemoryStorage::new();

        assert!(storage.get("missing").is_empty());
    }

    #[test]
    fn get_all_is_a_snapshot() {
        let cache = VariantCache::new(InMemoryStorage::new());
        cache.replace_all(&[("flag".to_owned(), Variant::new("a"))].into());

        let snapshot = cache.get_all();
        cache.replace_all(&[("other".to_owned(), Variant::new("b"))].into());

        assert_eq!(
            snapshot,
            HashMap::from([("flag".to_owned(), Variant::new("a"))])
        );
        assert_eq!(
            cache.get_all(),
            HashMap::from([("other".to_owned(), Variant::new("b"))])
        );
    }

    #[test]
    fn replace_all_drops_previous_keys() {
        let cache = VariantCache::new(InMemoryStorage::new());
        cache.replace_all(&[
            ("f1".to_owned(), Variant::new("a")),
            ("f2".to_owned(), Variant::new("b")),
        ]
        .into());

        cache.replace_all(&[("f1".to_owned(), Variant::new("c"))].into());

        assert_eq!(cache.get("f1"), Variant::new("c"));
        assert!(cache.get("f2").is_empty());
    }

    #[test]
    fn readers_never_observe_partial_replacement() {
        let cache = Arc::new(VariantCache::new(InMemoryStorage::new()));

        let generation = |n: usize| -> HashMap<String, Variant> {
            (0..50)
                .map(|i| (format!("flag-{i}"), Variant::new(n.to_string())))
                .collect()
        };

        let writer = {
            let cache = cache.clone();
            std::thread::spawn(move || {
                for n in 0..200 {
                    cache.replace_all(&generation(n));
                }
            })
        };

        for _ in 0..200 {
            let snapshot = cache.get_all();
            let values: std::collections::HashSet<_> =
                snapshot.values().map(|v| v.value().map(str::to_owned)).collect();
            assert!(values.len() <= 1, "observed mixed generations: {values:?}");
            assert!(snapshot.is_empty() || snapshot.len() == 50);
        }

        writer.join().unwrap();
    }
}
