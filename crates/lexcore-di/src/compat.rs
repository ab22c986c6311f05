//! Legacy string identifiers for services
//!
//! Older callers look services up by name. The names are translated to
//! [`ServiceKey`]s here, at the container boundary, so the resolution path
//! itself never deals in strings. The first lookup through each alias logs a
//! deprecation warning; later lookups through the same alias are silent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::registration::downcast;
use crate::{DIContainer, DIError, DIResult, ServiceInstance, ServiceKey};

#[derive(Default)]
pub(crate) struct LegacyAliases {
    aliases: RwLock<HashMap<String, ServiceKey>>,
    warned: Mutex<HashSet<String>>,
}

impl LegacyAliases {
    pub(crate) fn insert(&self, alias: String, key: ServiceKey) {
        self.aliases.write().insert(alias, key);
    }

    fn lookup(&self, alias: &str) -> Option<ServiceKey> {
        let key = self.aliases.read().get(alias).copied()?;
        if self.warned.lock().insert(alias.to_string()) {
            warn!(
                alias = alias,
                service = %key,
                "Service looked up by legacy name; resolve it by type instead"
            );
        }
        Some(key)
    }

    fn warned_count(&self) -> usize {
        self.warned.lock().len()
    }

    pub(crate) fn clear(&self) {
        self.aliases.write().clear();
        self.warned.lock().clear();
    }
}

impl DIContainer {
    /// Map a legacy string name onto a typed key
    pub fn register_alias(&self, alias: impl Into<String>, key: ServiceKey) {
        self.aliases.insert(alias.into(), key);
    }

    /// Translate a legacy name into its key, consulting parent containers
    pub fn alias_key(&self, alias: &str) -> DIResult<ServiceKey> {
        if let Some(key) = self.aliases.lookup(alias) {
            return Ok(key);
        }
        match self.parent() {
            Some(parent) => parent.alias_key(alias),
            None => Err(DIError::UnknownAlias {
                alias: alias.to_string(),
            }),
        }
    }

    /// Resolve a service through its legacy name
    pub async fn get_service_by_alias(&self, alias: &str) -> DIResult<ServiceInstance> {
        let key = self.alias_key(alias)?;
        self.get_service(key).await
    }

    /// Resolve a service through its legacy name and downcast it
    pub async fn resolve_by_alias<T>(&self, alias: &str) -> DIResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let key = self.alias_key(alias)?;
        let instance = self.get_service(key).await?;
        downcast::<T>(instance, key)
    }

    /// Number of aliases that have already produced their warning
    pub fn warned_alias_count(&self) -> usize {
        self.aliases.warned_count()
    }
}
