//! Service registration descriptors
//!
//! A [`ServiceRegistration`] bundles the async factory for one service type
//! with its lifetime, the ordered list of services it depends on and any
//! legacy string aliases.
//!
//! ```rust
//! use lexcore_di::ServiceRegistration;
//!
//! struct Index;
//! struct Search;
//!
//! let registration = ServiceRegistration::transient(|deps| async move {
//!     let _index = deps.get::<Index>()?;
//!     Ok(Search)
//! })
//! .depends_on::<Index>()
//! .with_alias("search_service");
//!
//! assert_eq!(registration.dependencies().len(), 1);
//! ```

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::{DIError, DIResult, ServiceKey, ServiceLifetime};

/// Type-erased service instance as stored in the container
pub type ServiceInstance = Arc<dyn Any + Send + Sync>;

type FactoryFn =
    Arc<dyn Fn(Dependencies) -> BoxFuture<'static, DIResult<ServiceInstance>> + Send + Sync>;

pub(crate) fn downcast<T>(instance: ServiceInstance, key: ServiceKey) -> DIResult<Arc<T>>
where
    T: Send + Sync + 'static,
{
    instance
        .downcast::<T>()
        .map_err(|_| DIError::InvalidServiceType {
            message: format!("instance stored under {} has a different type", key),
        })
}

/// Resolved dependencies handed to a factory, in declaration order
pub struct Dependencies {
    resolved: Vec<(ServiceKey, ServiceInstance)>,
}

impl Dependencies {
    pub(crate) fn new(resolved: Vec<(ServiceKey, ServiceInstance)>) -> Self {
        Self { resolved }
    }

    /// Fetch a declared dependency by type
    pub fn get<T>(&self) -> DIResult<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let key = ServiceKey::of::<T>();
        let instance = self
            .resolved
            .iter()
            .find(|(declared, _)| *declared == key)
            .map(|(_, instance)| Arc::clone(instance))
            .ok_or_else(|| DIError::InvalidServiceType {
                message: format!("{} was not declared as a dependency", key),
            })?;
        downcast(instance, key)
    }

    /// Keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = ServiceKey> + '_ {
        self.resolved.iter().map(|(key, _)| *key)
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Registration information for one service type
#[derive(Clone)]
pub struct ServiceRegistration {
    key: ServiceKey,
    factory: FactoryFn,
    lifetime: ServiceLifetime,
    dependencies: Vec<ServiceKey>,
    aliases: Vec<String>,
}

impl ServiceRegistration {
    /// A service built once per container
    pub fn singleton<T, F, Fut>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DIResult<T>> + Send + 'static,
    {
        Self::with_lifetime(ServiceLifetime::Singleton, factory)
    }

    /// A service built on every request
    pub fn transient<T, F, Fut>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DIResult<T>> + Send + 'static,
    {
        Self::with_lifetime(ServiceLifetime::Transient, factory)
    }

    fn with_lifetime<T, F, Fut>(lifetime: ServiceLifetime, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DIResult<T>> + Send + 'static,
    {
        let factory: FactoryFn = Arc::new(move |deps| {
            let pending = factory(deps);
            async move {
                let service = pending.await?;
                Ok(Arc::new(service) as ServiceInstance)
            }
            .boxed()
        });

        Self {
            key: ServiceKey::of::<T>(),
            factory,
            lifetime,
            dependencies: Vec::new(),
            aliases: Vec::new(),
        }
    }

    /// Declare a dependency on the service type `D`
    pub fn depends_on<D>(self) -> Self
    where
        D: Send + Sync + 'static,
    {
        self.with_dependency(ServiceKey::of::<D>())
    }

    /// Declare a dependency by key
    pub fn with_dependency(mut self, key: ServiceKey) -> Self {
        self.dependencies.push(key);
        self
    }

    /// Map a legacy string name onto this service
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn key(&self) -> ServiceKey {
        self.key
    }

    pub fn lifetime(&self) -> ServiceLifetime {
        self.lifetime
    }

    pub fn is_singleton(&self) -> bool {
        self.lifetime == ServiceLifetime::Singleton
    }

    pub fn dependencies(&self) -> &[ServiceKey] {
        &self.dependencies
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    pub(crate) fn build(&self, deps: Dependencies) -> BoxFuture<'static, DIResult<ServiceInstance>> {
        (self.factory)(deps)
    }
}

impl std::fmt::Debug for ServiceRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistration")
            .field("key", &self.key)
            .field("lifetime", &self.lifetime)
            .field("dependencies", &self.dependencies)
            .field("aliases", &self.aliases)
            .finish()
    }
}
