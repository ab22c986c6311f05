//! Dependency Injection Container for lexcore
//!
//! This crate resolves services by type identity. Registrations carry an async
//! factory, a lifetime and an ordered list of declared dependencies; the
//! container resolves those dependencies before invoking the factory.
//!
//! ## Quick Start
//!
//! ```rust
//! use lexcore_di::{DIContainer, ServiceKey, ServiceRegistration};
//!
//! struct Clock;
//! struct Scheduler {
//!     clock: std::sync::Arc<Clock>,
//! }
//!
//! # tokio_test::block_on(async {
//! let container = DIContainer::new();
//! container.register_service(ServiceRegistration::singleton(|_| async { Ok(Clock) }));
//! container.register_service(
//!     ServiceRegistration::singleton(|deps| async move {
//!         Ok(Scheduler { clock: deps.get::<Clock>()? })
//!     })
//!     .depends_on::<Clock>(),
//! );
//!
//! let scheduler = container.resolve::<Scheduler>().await.unwrap();
//! let clock = container.resolve::<Clock>().await.unwrap();
//! assert!(std::sync::Arc::ptr_eq(&scheduler.clock, &clock));
//! # });
//! ```
//!
//! Singletons are constructed at most once per container, even when many tasks
//! request them concurrently. Dependency cycles are reported as
//! [`DIError::DependencyCycle`] instead of hanging on the construction lock.

pub mod compat;
pub mod provider;
pub mod registration;

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::compat::LegacyAliases;

pub use provider::{ServiceProvider, ServiceProviderRegistry};
pub use registration::{Dependencies, ServiceInstance, ServiceRegistration};

/// Errors that can occur during dependency injection operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum DIError {
    #[error("Service not registered: {service_type}")]
    ServiceNotRegistered { service_type: String },

    #[error("Invalid service type: {message}")]
    InvalidServiceType { message: String },

    #[error("Dependency cycle detected: {chain}")]
    DependencyCycle { chain: String },

    #[error("Unknown service alias: {alias}")]
    UnknownAlias { alias: String },

    #[error("Factory for {service_type} failed: {message}")]
    FactoryFailed { service_type: String, message: String },
}

impl DIError {
    pub(crate) fn not_registered(key: ServiceKey) -> Self {
        Self::ServiceNotRegistered {
            service_type: key.type_name().to_string(),
        }
    }

    /// Wrap an arbitrary construction error for the given service type
    pub fn factory_failed<T: ?Sized + 'static>(message: impl fmt::Display) -> Self {
        Self::FactoryFailed {
            service_type: std::any::type_name::<T>().to_string(),
            message: message.to_string(),
        }
    }
}

pub type DIResult<T> = Result<T, DIError>;

/// Service lifetime management
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// Created once per container and cached
    Singleton,
    /// Created on every request, never cached
    Transient,
}

/// Type identity used to register and resolve services
///
/// Equality and hashing only consider the `TypeId`; the type name is kept for
/// error messages and logs.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl ServiceKey {
    /// Key for the service type `T`
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Fully qualified name of the keyed type
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceKey").field(&self.type_name).finish()
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Keys currently being constructed on one resolution path
#[derive(Debug, Clone, Default)]
struct ResolutionChain(Vec<ServiceKey>);

impl ResolutionChain {
    fn contains(&self, key: ServiceKey) -> bool {
        self.0.contains(&key)
    }

    fn extended(&self, key: ServiceKey) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Self(keys)
    }

    fn describe_closing(&self, key: ServiceKey) -> String {
        self.0
            .iter()
            .chain(std::iter::once(&key))
            .map(|k| k.type_name())
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// The dependency injection container
pub struct DIContainer {
    registrations: RwLock<HashMap<ServiceKey, ServiceRegistration>>,
    instances: RwLock<HashMap<ServiceKey, ServiceInstance>>,
    construction_locks: Mutex<HashMap<ServiceKey, Arc<AsyncMutex<()>>>>,
    aliases: LegacyAliases,
    parent: Option<Arc<DIContainer>>,
}

impl DIContainer {
    /// Create a new empty DI container
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            instances: RwLock::new(HashMap::new()),
            construction_locks: Mutex::new(HashMap::new()),
            aliases: LegacyAliases::default(),
            parent: None,
        }
    }

    /// Create a container that falls back to `parent` for unregistered keys
    pub fn with_parent(parent: Arc<DIContainer>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new()
        }
    }

    /// Create a child scope of this container
    pub fn create_child(self: &Arc<Self>) -> DIContainer {
        Self::with_parent(Arc::clone(self))
    }

    /// Parent container, if any
    pub fn parent(&self) -> Option<&Arc<DIContainer>> {
        self.parent.as_ref()
    }

    /// Register a service, replacing any earlier registration for its key
    pub fn register_service(&self, registration: ServiceRegistration) {
        let key = registration.key();
        for alias in registration.aliases() {
            self.aliases.insert(alias.clone(), key);
        }

        let replaced = self.registrations.write().insert(key, registration).is_some();
        if replaced {
            // A fresh registration must not hand out the old singleton.
            self.instances.write().remove(&key);
            debug!(service = %key, "Replaced service registration");
        } else {
            debug!(service = %key, "Registered service");
        }
    }

    /// Seed the instance cache with an already constructed service
    pub fn register_instance<T>(&self, instance: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.register_instance_with_aliases(instance, &[]);
    }

    /// Seed the instance cache and map legacy string names onto the type
    pub fn register_instance_with_aliases<T>(&self, instance: Arc<T>, aliases: &[&str])
    where
        T: Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        for alias in aliases {
            self.aliases.insert((*alias).to_string(), key);
        }
        self.instances.write().insert(key, instance as ServiceInstance);
        debug!(service = %key, "Registered service instance");
    }

    /// Resolve a service by its type
    pub async fn resolve<T>(&self) -> DIResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        let instance = self.get_service(key).await?;
        registration::downcast::<T>(instance, key)
    }

    /// Resolve a service by key without knowing its concrete type
    pub async fn get_service(&self, key: ServiceKey) -> DIResult<ServiceInstance> {
        self.check_declared_graph(key, &mut Vec::new(), &mut HashSet::new())?;
        self.resolve_in_chain(key, ResolutionChain::default()).await
    }

    /// Walk the declared dependencies of `key` without taking any lock
    ///
    /// Runs before construction starts, so two tasks entering a cycle from
    /// opposite ends both fail instead of each holding one construction lock.
    fn check_declared_graph(
        &self,
        key: ServiceKey,
        path: &mut Vec<ServiceKey>,
        acyclic: &mut HashSet<ServiceKey>,
    ) -> DIResult<()> {
        if path.contains(&key) {
            return Err(DIError::DependencyCycle {
                chain: ResolutionChain(path.clone()).describe_closing(key),
            });
        }
        if acyclic.contains(&key) || self.cached(key).is_some() {
            return Ok(());
        }

        let dependencies = self
            .registrations
            .read()
            .get(&key)
            .map(|registration| registration.dependencies().to_vec());
        let Some(dependencies) = dependencies else {
            // Unregistered keys are reported by resolution itself.
            return match &self.parent {
                Some(parent) => {
                    parent.check_declared_graph(key, &mut Vec::new(), &mut HashSet::new())
                }
                None => Ok(()),
            };
        };

        path.push(key);
        for dependency in dependencies {
            self.check_declared_graph(dependency, path, acyclic)?;
        }
        path.pop();
        acyclic.insert(key);
        Ok(())
    }

    fn resolve_in_chain<'a>(
        &'a self,
        key: ServiceKey,
        chain: ResolutionChain,
    ) -> BoxFuture<'a, DIResult<ServiceInstance>> {
        async move {
            if chain.contains(key) {
                return Err(DIError::DependencyCycle {
                    chain: chain.describe_closing(key),
                });
            }

            if let Some(instance) = self.cached(key) {
                return Ok(instance);
            }

            let registration = self.registrations.read().get(&key).cloned();
            let Some(registration) = registration else {
                return match &self.parent {
                    Some(parent) => {
                        debug!(service = %key, "Delegating resolution to parent container");
                        parent.resolve_in_chain(key, chain).await
                    }
                    None => Err(DIError::not_registered(key)),
                };
            };

            match registration.lifetime() {
                ServiceLifetime::Transient => {
                    self.construct(&registration, chain.extended(key)).await
                }
                ServiceLifetime::Singleton => {
                    let lock = self.construction_lock(key);
                    let _guard = lock.lock().await;

                    // A racing caller may have finished construction first.
                    if let Some(instance) = self.cached(key) {
                        return Ok(instance);
                    }

                    let instance = self.construct(&registration, chain.extended(key)).await?;
                    self.instances.write().insert(key, Arc::clone(&instance));
                    Ok(instance)
                }
            }
        }
        .boxed()
    }

    async fn construct(
        &self,
        registration: &ServiceRegistration,
        chain: ResolutionChain,
    ) -> DIResult<ServiceInstance> {
        let mut resolved = Vec::with_capacity(registration.dependencies().len());
        for dependency in registration.dependencies() {
            let instance = self.resolve_in_chain(*dependency, chain.clone()).await?;
            resolved.push((*dependency, instance));
        }

        debug!(
            service = %registration.key(),
            dependencies = resolved.len(),
            "Constructing service"
        );
        registration.build(Dependencies::new(resolved)).await
    }

    fn cached(&self, key: ServiceKey) -> Option<ServiceInstance> {
        self.instances.read().get(&key).cloned()
    }

    fn construction_lock(&self, key: ServiceKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.construction_locks.lock();
        Arc::clone(locks.entry(key).or_default())
    }

    /// Check if a service is registered here or in a parent container
    pub fn is_registered<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.contains_key(ServiceKey::of::<T>())
    }

    /// Check if a key is registered here or in a parent container
    pub fn contains_key(&self, key: ServiceKey) -> bool {
        self.registrations.read().contains_key(&key)
            || self.instances.read().contains_key(&key)
            || self
                .parent
                .as_ref()
                .map(|parent| parent.contains_key(key))
                .unwrap_or(false)
    }

    /// Number of keys this container can serve without its parent
    pub fn service_count(&self) -> usize {
        let registrations = self.registrations.read();
        let seeded_only = self
            .instances
            .read()
            .keys()
            .filter(|key| !registrations.contains_key(key))
            .count();
        registrations.len() + seeded_only
    }

    /// Drop every registration, cached instance and alias
    pub fn clear(&self) {
        self.registrations.write().clear();
        self.instances.write().clear();
        self.construction_locks.lock().clear();
        self.aliases.clear();
        info!("Cleared all services from DI container");
    }
}

impl Default for DIContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DIContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DIContainer")
            .field("services", &self.service_count())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Builder pattern for configuring the DI container
pub struct DIContainerBuilder {
    container: DIContainer,
    providers: ServiceProviderRegistry,
}

impl DIContainerBuilder {
    /// Create a new container builder
    pub fn new() -> Self {
        Self {
            container: DIContainer::new(),
            providers: ServiceProviderRegistry::new(),
        }
    }

    /// Fall back to `parent` for keys the built container does not register
    pub fn parent(mut self, parent: Arc<DIContainer>) -> Self {
        self.container.parent = Some(parent);
        self
    }

    /// Register a service
    pub fn register(self, registration: ServiceRegistration) -> Self {
        self.container.register_service(registration);
        self
    }

    /// Seed an already constructed instance
    pub fn instance<T>(self, instance: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.container.register_instance(instance);
        self
    }

    /// Install a group of registrations when the container is built
    pub fn provider<P: ServiceProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.add(provider);
        self
    }

    /// Build the container, running every provider in priority order
    pub fn build(self) -> DIResult<DIContainer> {
        self.providers.register_all(&self.container)?;
        Ok(self.container)
    }
}

impl Default for DIContainerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Leaf;

    struct Branch {
        leaf: Arc<Leaf>,
    }

    struct Left;
    struct Right;

    #[test]
    fn test_service_key_identity() {
        assert_eq!(ServiceKey::of::<Leaf>(), ServiceKey::of::<Leaf>());
        assert_ne!(ServiceKey::of::<Leaf>(), ServiceKey::of::<Branch>());
        assert!(ServiceKey::of::<Leaf>().type_name().ends_with("Leaf"));
    }

    #[tokio::test]
    async fn test_dependencies_resolved_before_factory() {
        let container = DIContainer::new();
        container.register_service(ServiceRegistration::singleton(|_| async { Ok(Leaf) }));
        container.register_service(
            ServiceRegistration::transient(|deps| async move {
                Ok(Branch {
                    leaf: deps.get::<Leaf>()?,
                })
            })
            .depends_on::<Leaf>(),
        );

        let first = container.resolve::<Branch>().await.unwrap();
        let second = container.resolve::<Branch>().await.unwrap();
        assert!(Arc::ptr_eq(&first.leaf, &second.leaf));
    }

    #[tokio::test]
    async fn test_cycle_fails_fast() {
        let container = DIContainer::new();
        container.register_service(
            ServiceRegistration::singleton(|_| async { Ok(Left) }).depends_on::<Right>(),
        );
        container.register_service(
            ServiceRegistration::singleton(|_| async { Ok(Right) }).depends_on::<Left>(),
        );

        let result = container.resolve::<Left>().await;
        match result {
            Err(DIError::DependencyCycle { chain }) => {
                assert!(chain.contains("Left"));
                assert!(chain.contains("Right"));
            }
            other => panic!("expected cycle error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_declared_cycle_found_without_construction() {
        let container = DIContainer::new();
        container.register_service(ServiceRegistration::singleton(|_| async { Ok(Leaf) }));
        container.register_service(
            ServiceRegistration::singleton(|_| async { Ok(Left) })
                .depends_on::<Leaf>()
                .depends_on::<Right>(),
        );
        container.register_service(
            ServiceRegistration::singleton(|_| async { Ok(Right) }).depends_on::<Left>(),
        );

        let mut path = Vec::new();
        let err = container
            .check_declared_graph(ServiceKey::of::<Right>(), &mut path, &mut HashSet::new())
            .err()
            .unwrap();
        assert!(matches!(err, DIError::DependencyCycle { .. }));
        assert!(container.construction_locks.lock().is_empty());

        let mut path = Vec::new();
        assert!(container
            .check_declared_graph(ServiceKey::of::<Leaf>(), &mut path, &mut HashSet::new())
            .is_ok());
    }

    #[tokio::test]
    async fn test_self_dependency_is_a_cycle() {
        let container = DIContainer::new();
        container.register_service(
            ServiceRegistration::singleton(|_| async { Ok(Leaf) }).depends_on::<Leaf>(),
        );
        assert!(matches!(
            container.resolve::<Leaf>().await,
            Err(DIError::DependencyCycle { .. })
        ));
    }

    #[tokio::test]
    async fn test_reregistration_drops_cached_singleton() {
        let calls = Arc::new(AtomicUsize::new(0));
        let container = DIContainer::new();

        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            container.register_service(ServiceRegistration::singleton(move |_| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Leaf)
                }
            }));
            container.resolve::<Leaf>().await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(container.service_count(), 1);
    }

    #[tokio::test]
    async fn test_factory_error_propagates() {
        let container = DIContainer::new();
        container.register_service(ServiceRegistration::singleton(|_| async {
            Err::<Leaf, _>(DIError::factory_failed::<Leaf>("disk unavailable"))
        }));

        let err = container.resolve::<Leaf>().await.err().unwrap();
        assert!(err.to_string().contains("disk unavailable"));
        // A failed construction is not cached.
        assert!(container.cached(ServiceKey::of::<Leaf>()).is_none());
    }

    #[test]
    fn test_builder_runs_providers() {
        struct LeafProvider;

        impl ServiceProvider for LeafProvider {
            fn name(&self) -> &'static str {
                "leaf"
            }

            fn register(&self, container: &DIContainer) -> DIResult<()> {
                container.register_instance(Arc::new(Leaf));
                Ok(())
            }
        }

        let container = DIContainerBuilder::new()
            .provider(LeafProvider)
            .build()
            .unwrap();
        assert!(container.is_registered::<Leaf>());
    }
}
