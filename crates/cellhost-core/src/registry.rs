//! The host registry: named instances with callable methods.
//!
//! Instances are created from a static table of types, addressed as
//! `name://<name>`, and disposed of explicitly. Each instance sits behind its
//! own lock so calls to one instance are serialised while different
//! instances run independently.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use indexmap::IndexMap;
use indexmap::map::Entry;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Address scheme of registry instances.
pub const SCHEME: &str = "name://";

/// Something the registry can hold and dispatch method calls to.
pub trait Instance: Send {
    /// Registry type name the instance was created from.
    fn type_name(&self) -> &'static str;

    /// Invoke a method with JSON arguments.
    fn call(&mut self, method: &str, args: serde_json::Value) -> Result<serde_json::Value>;

    /// Serializable view of the instance.
    fn snapshot(&self) -> serde_json::Value;
}

/// A registered instance.
pub type SharedInstance = Arc<Mutex<Box<dyn Instance>>>;

/// Lock an instance, recovering from a panic in an earlier call.
pub fn lock(instance: &SharedInstance) -> MutexGuard<'_, Box<dyn Instance>> {
    instance.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Defaults applied to every instance a registry creates. Options passed to
/// `post` override them field by field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    #[cfg(feature = "sqlite")]
    pub sqlite: crate::context::SqliteOptions,
}

type Constructor = fn(&str, &HostConfig, serde_json::Value) -> Result<Box<dyn Instance>>;

/// Types this host can instantiate, in manifest order.
pub fn types() -> Vec<&'static str> {
    let mut types = Vec::new();
    #[cfg(feature = "python")]
    types.push("PythonContext");
    #[cfg(feature = "sqlite")]
    types.push("SqliteContext");
    types
}

fn constructor(type_name: &str) -> Option<Constructor> {
    match type_name {
        #[cfg(feature = "python")]
        "PythonContext" => Some(|_, _, _| {
            Ok(Box::new(crate::context::PythonContext::new()?) as Box<dyn Instance>)
        }),
        #[cfg(feature = "sqlite")]
        "SqliteContext" => Some(|name, config, options| {
            let options = overlay(&config.sqlite, options)?;
            Ok(Box::new(crate::context::SqliteContext::new(name, options)?) as Box<dyn Instance>)
        }),
        _ => None,
    }
}

/// Apply the fields of a JSON object over a serializable default.
#[cfg_attr(not(feature = "sqlite"), allow(dead_code))]
fn overlay<T: Serialize + DeserializeOwned>(base: &T, options: serde_json::Value) -> Result<T> {
    let mut merged = serde_json::to_value(base)?;
    match (merged.as_object_mut(), options) {
        (_, serde_json::Value::Null) => {}
        (Some(fields), serde_json::Value::Object(overrides)) => fields.extend(overrides),
        (_, other) => {
            return Err(Error::InvalidArguments(format!(
                "options should be an object, got {other}"
            )));
        }
    }
    serde_json::from_value(merged).map_err(|e| Error::InvalidArguments(format!("invalid options: {e}")))
}

/// Accept either a full address or a bare instance name.
pub fn normalize_address(address: &str) -> String {
    if address.starts_with(SCHEME) {
        address.to_string()
    } else {
        format!("{SCHEME}{address}")
    }
}

fn lower_camel(type_name: &str) -> String {
    let mut chars = type_name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Process-wide table of live instances.
pub struct Registry {
    id: String,
    config: HostConfig,
    instances: Mutex<IndexMap<String, SharedInstance>>,
    counts: Mutex<FxHashMap<String, usize>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(HostConfig::default())
    }
}

impl Registry {
    pub fn new(config: HostConfig) -> Self {
        Self {
            id: format!("rs-host-{}", uuid::Uuid::new_v4()),
            config,
            instances: Mutex::new(IndexMap::new()),
            counts: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    fn instances(&self) -> MutexGuard<'_, IndexMap<String, SharedInstance>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an instance of a type and return its address.
    ///
    /// Without a name, one is generated from the type name and a per-type
    /// counter, such as `pythonContext1`.
    pub fn post(
        &self,
        type_name: &str,
        name: Option<&str>,
        options: serde_json::Value,
    ) -> Result<String> {
        let construct =
            constructor(type_name).ok_or_else(|| Error::UnknownType(type_name.to_string()))?;

        let requested = name
            .filter(|name| !name.is_empty())
            .map(|name| name.trim_start_matches(SCHEME).to_string());
        loop {
            let name = match &requested {
                Some(name) => name.clone(),
                None => self.next_name(type_name),
            };
            let address = normalize_address(&name);
            if requested.is_some() && self.instances().contains_key(&address) {
                return Err(Error::InvalidArguments(format!(
                    "instance already exists: {address}"
                )));
            }

            let instance = construct(&name, &self.config, options.clone())?;
            match self.instances().entry(address.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::new(Mutex::new(instance)));
                }
                Entry::Occupied(_) if requested.is_some() => {
                    return Err(Error::InvalidArguments(format!(
                        "instance already exists: {address}"
                    )));
                }
                // A generated name was taken concurrently; draw another.
                Entry::Occupied(_) => continue,
            }
            tracing::info!(%address, type_name, "created instance");
            return Ok(address);
        }
    }

    /// Next free generated name for a type, such as `pythonContext1`.
    fn next_name(&self, type_name: &str) -> String {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        let count = counts.entry(type_name.to_string()).or_insert(0);
        loop {
            *count += 1;
            let name = format!("{}{}", lower_camel(type_name), count);
            if !self.instances().contains_key(&normalize_address(&name)) {
                return name;
            }
        }
    }

    /// Look up an instance.
    pub fn instance(&self, address: &str) -> Result<SharedInstance> {
        let address = normalize_address(address);
        self.instances()
            .get(&address)
            .cloned()
            .ok_or(Error::UnknownInstance(address))
    }

    /// Snapshot of an instance.
    pub fn get(&self, address: &str) -> Result<serde_json::Value> {
        let instance = self.instance(address)?;
        let guard = lock(&instance);
        let mut snapshot = guard.snapshot();
        if let Some(fields) = snapshot.as_object_mut() {
            fields.insert("address".to_string(), normalize_address(address).into());
        }
        Ok(snapshot)
    }

    /// Call a method of an instance.
    pub fn put(
        &self,
        address: &str,
        method: &str,
        args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        let instance = self.instance(address)?;
        tracing::debug!(address, method, "calling instance method");
        let mut guard = lock(&instance);
        guard.call(method, args)
    }

    /// Dispose of an instance.
    pub fn delete(&self, address: &str) -> Result<()> {
        let address = normalize_address(address);
        match self.instances().shift_remove(&address) {
            Some(_) => {
                tracing::info!(%address, "deleted instance");
                Ok(())
            }
            None => Err(Error::UnknownInstance(address)),
        }
    }

    /// Addresses of live instances, in creation order.
    pub fn addresses(&self) -> Vec<String> {
        self.instances().keys().cloned().collect()
    }

    pub fn types(&self) -> Vec<&'static str> {
        types()
    }

    /// Description of this host and what it holds.
    pub fn manifest(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "cellhost": {
                "package": "rs",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "types": self.types(),
            "instances": self.addresses(),
        })
    }
}
