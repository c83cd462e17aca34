//! Carina Azure Container Provider
//!
//! Manages Azure container workloads (container groups, container registries
//! and their nested resources, AKS clusters and node pools) through Azure
//! Resource Manager.
//!
//! ## Module Structure
//!
//! - `adapters` - Convergence waits for the asynchronous parts of ARM
//! - `addons` - Managed cluster addon profiles and per-cloud availability
//! - `arm` - ARM REST client
//! - `config` - Provider configuration
//! - `expand` - DSL attribute <-> ARM body mapping
//! - `locks` - In-process named locks
//! - `provider` - AzureContainerProvider implementation
//! - `resource_id` - ARM resource ID parsing
//! - `resources` - Resource type definitions and configurations
//! - `utils` - Helper functions for value normalization

pub mod adapters;
pub mod addons;
pub mod arm;
pub mod config;
pub mod expand;
pub mod locks;
pub mod provider;
pub mod resource_id;
pub mod resources;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types
pub use config::{AzureProviderConfig, CloudEnvironment};
pub use provider::AzureContainerProvider;

use carina_core::provider::{BoxFuture, Provider, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State};

use resources::resource_types;

// =============================================================================
// Provider Trait Implementation
// =============================================================================

impl Provider for AzureContainerProvider {
    fn name(&self) -> &'static str {
        "azure"
    }

    fn resource_types(&self) -> Vec<Box<dyn carina_core::provider::ResourceType>> {
        resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.map(|s| s.to_string());
        Box::pin(async move { self.read_resource(&id, identifier.as_deref()).await })
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        let resource = resource.clone();
        Box::pin(async move { self.create_resource(resource).await })
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        let from = from.clone();
        let to = to.clone();
        Box::pin(async move { self.update_resource(id, &identifier, &from, to).await })
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        let id = id.clone();
        let identifier = identifier.to_string();
        Box::pin(async move { self.delete_resource(&id, &identifier).await })
    }
}
