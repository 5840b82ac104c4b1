use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::value::{Item, Value};

/// The flattened, classified configuration for one logical name.
#[derive(Debug, Clone)]
pub struct ConfigObject {
    name: String,
    data: BTreeMap<String, Value>,
}

impl ConfigObject {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Item {
        match self.data.get(key) {
            Some(value) => Item::present(value.clone()),
            None => Item::missing(),
        }
    }

    pub fn all(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

pub type ChangeCallback = dyn Fn(&str, &ConfigObject) + Send + Sync;

/// Process-wide store of `logical name -> ConfigObject`.
///
/// Writes replace the whole object under the exclusive lock, so readers
/// never observe a partially refreshed mapping. The lock is never held
/// across an await point.
#[derive(Default)]
pub struct Registry {
    objects: RwLock<HashMap<String, Arc<ConfigObject>>>,
    callback: RwLock<Option<Box<ChangeCallback>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swaps in a freshly built object for `name` and returns it.
    /// Does not fire the change callback; see [`Registry::notify`].
    pub fn install(
        &self,
        name: &str,
        data: BTreeMap<String, Value>,
    ) -> Arc<ConfigObject> {
        let object =
            Arc::new(ConfigObject { name: name.to_string(), data });
        let mut objects =
            self.objects.write().unwrap_or_else(|e| e.into_inner());
        objects.insert(name.to_string(), Arc::clone(&object));
        drop(objects);
        object
    }

    /// Invokes the registered change callback, outside any lock on the
    /// object table.
    pub fn notify(
        &self,
        object: &ConfigObject,
    ) {
        let callback =
            self.callback.read().unwrap_or_else(|e| e.into_inner());
        if let Some(callback) = callback.as_ref() {
            callback(object.name(), object);
        }
    }

    pub fn object(
        &self,
        name: &str,
    ) -> Option<Arc<ConfigObject>> {
        let objects =
            self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.get(name).cloned()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        let objects =
            self.objects.read().unwrap_or_else(|e| e.into_inner());
        objects.contains_key(name)
    }

    /// Replaces the single process-wide change callback.
    pub fn set_callback(
        &self,
        callback: Box<ChangeCallback>,
    ) {
        let mut slot =
            self.callback.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(callback);
    }
}
