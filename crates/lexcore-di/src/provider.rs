//! Service providers group related registrations
//!
//! A provider installs one family of services (for example the agent
//! collaborators) and can state which keys must be resolvable once every
//! provider has run.
//!
//! ```rust,ignore
//! use lexcore_di::{DIContainer, DIResult, ServiceProvider};
//! use std::sync::Arc;
//!
//! pub struct StorageProvider;
//!
//! impl ServiceProvider for StorageProvider {
//!     fn name(&self) -> &'static str {
//!         "storage"
//!     }
//!
//!     fn register(&self, container: &DIContainer) -> DIResult<()> {
//!         container.register_instance(Arc::new(MetadataStore::default()));
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use tracing::{debug, info};

use crate::{DIContainer, DIError, DIResult, ServiceKey};

/// Trait for types that install services into a container
pub trait ServiceProvider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Lower values are installed first. Default is 100.
    fn priority(&self) -> u32 {
        100
    }

    /// Install services into the container
    fn register(&self, container: &DIContainer) -> DIResult<()>;

    /// Keys that must be resolvable after all providers have run
    fn required_services(&self) -> Vec<ServiceKey> {
        Vec::new()
    }
}

/// Ordered collection of providers
pub struct ServiceProviderRegistry {
    providers: Vec<Arc<dyn ServiceProvider>>,
}

impl ServiceProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn add<P: ServiceProvider + 'static>(&mut self, provider: P) -> &mut Self {
        self.providers.push(Arc::new(provider));
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Install every provider by ascending priority, then check requirements
    pub fn register_all(&self, container: &DIContainer) -> DIResult<()> {
        let mut ordered: Vec<_> = self.providers.iter().collect();
        ordered.sort_by_key(|p| p.priority());

        for provider in &ordered {
            debug!(
                provider = provider.name(),
                priority = provider.priority(),
                "Installing service provider"
            );
            provider.register(container)?;
        }

        for provider in &ordered {
            if let Some(missing) = provider
                .required_services()
                .into_iter()
                .find(|key| !container.contains_key(*key))
            {
                return Err(DIError::ServiceNotRegistered {
                    service_type: format!("{} (required by {})", missing, provider.name()),
                });
            }
        }

        info!(providers = ordered.len(), "Service providers installed");
        Ok(())
    }
}

impl Default for ServiceProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
