//! Azure container provider implementation
//!
//! This module contains the main provider implementation that talks to
//! Azure Resource Manager. Every operation runs under a deadline derived from
//! the resource type's timeouts and only returns once ARM has converged.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use carina_core::convergence::WaitContext;
use carina_core::differ::diff;
use carina_core::provider::{ProviderError, ProviderResult};
use carina_core::resource::{Resource, ResourceId, State, Value};
use log::{debug, info};
use serde_json::{Value as Json, json};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::adapters::{WaitSettings, detachment, provisioning, replication, run};
use crate::addons::{AddonProfiles, UnsupportedAddons};
use crate::arm::{ArmClient, ArmResult, HttpArmClient};
use crate::config::{AzureProviderConfig, CloudEnvironment};
use crate::expand::{expand_attributes, expand_changes, flatten_body, merge_body};
use crate::locks::NamedLocks;
use crate::resource_id::AzureResourceId;
use crate::resources::{
    CONTAINER_GROUP_CONFIG, OperationTimeouts, Placement, REGISTRY_TASK_API_VERSION,
    ResourceConfig, UpdateStrategy, get_resource_config,
};
use crate::utils::{attribute_to_json, normalize_location};

/// Run one ARM request, giving up when `ctx` is cancelled or expires
async fn within<T>(
    ctx: &WaitContext,
    what: &str,
    request: impl Future<Output = ArmResult<T>>,
) -> ProviderResult<T> {
    tokio::select! {
        biased;
        _ = ctx.token().cancelled() => Err(ProviderError::new(format!("{} was cancelled", what))),
        _ = sleep_until(ctx.deadline()) => Err(ProviderError::new(format!(
            "{} did not complete before the operation deadline",
            what
        ))),
        result = request => result.map_err(ProviderError::from),
    }
}

/// Azure container provider
pub struct AzureContainerProvider {
    client: Arc<dyn ArmClient>,
    subscription_id: String,
    environment: CloudEnvironment,
    unsupported_addons: UnsupportedAddons,
    locks: NamedLocks,
    cancel: CancellationToken,
    settings: WaitSettings,
    timeouts: Option<OperationTimeouts>,
}

impl AzureContainerProvider {
    /// Create a provider talking to ARM over HTTPS
    pub fn new(config: AzureProviderConfig) -> ProviderResult<Self> {
        let client = HttpArmClient::new(&config)?;
        Ok(Self::with_client(config, Arc::new(client)))
    }

    /// Create a provider over an existing ARM client
    pub fn with_client(config: AzureProviderConfig, client: Arc<dyn ArmClient>) -> Self {
        Self {
            client,
            subscription_id: config.subscription_id,
            environment: config.environment,
            unsupported_addons: UnsupportedAddons::default(),
            locks: NamedLocks::new(),
            cancel: CancellationToken::new(),
            settings: WaitSettings::default(),
            timeouts: config.timeouts,
        }
    }

    pub fn with_unsupported_addons(mut self, table: UnsupportedAddons) -> Self {
        self.unsupported_addons = table;
        self
    }

    pub fn with_wait_settings(mut self, settings: WaitSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share named locks with other providers in the same process
    pub fn with_locks(mut self, locks: NamedLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Cancel every in-flight operation; later operations fail immediately
    pub fn shutdown(&self) {
        info!("Shutting down Azure provider, cancelling in-flight operations");
        self.cancel.cancel();
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn config_for(&self, id: &ResourceId) -> ProviderResult<&'static ResourceConfig> {
        get_resource_config(&id.resource_type).ok_or_else(|| {
            ProviderError::new(format!("Unknown resource type: {}", id.resource_type))
                .for_resource(id.clone())
        })
    }

    fn timeouts(&self, config: &ResourceConfig) -> OperationTimeouts {
        self.timeouts.unwrap_or(config.timeouts)
    }

    fn context(&self, timeout: Duration) -> WaitContext {
        WaitContext::new(Instant::now() + timeout, self.cancel.child_token())
    }

    /// ARM ID a resource will be created at
    fn arm_id(&self, config: &ResourceConfig, resource: &Resource) -> ProviderResult<String> {
        let name = resource.get_string("name").unwrap_or(&resource.id.name);
        let required = |key: &str| {
            resource
                .get_string(key)
                .ok_or_else(|| ProviderError::new(format!("Missing required attribute '{}'", key)))
        };

        match config.placement {
            Placement::ResourceGroup { provider_type } => {
                let (namespace, type_name) = provider_type.split_once('/').ok_or_else(|| {
                    ProviderError::new(format!("Malformed ARM type {}", provider_type))
                })?;
                Ok(AzureResourceId::new(
                    &self.subscription_id,
                    required("resource_group_name")?,
                    namespace,
                    type_name,
                    name,
                )
                .to_string())
            }
            Placement::Child {
                parent_attribute,
                segment,
            } => {
                let parent = AzureResourceId::parse(required(parent_attribute)?)?;
                Ok(parent.child(segment, name).to_string())
            }
            Placement::TaskRun { .. } => Err(ProviderError::new(
                "Registry task runs are scheduled, not created at a fixed ID",
            )),
        }
    }

    fn validate_addons(&self, resource: &Resource) -> ProviderResult<()> {
        if resource.id.resource_type != "kubernetes_cluster" {
            return Ok(());
        }
        if let Some(addons) = resource.attributes.get("addons") {
            let profiles = AddonProfiles::from_value(addons)?;
            self.unsupported_addons
                .validate(self.environment, &profiles)?;
        }
        Ok(())
    }

    /// Subnets a create must hold locks on
    fn subnet_lock_keys(resource: &Resource) -> Vec<String> {
        match resource.id.resource_type.as_str() {
            "kubernetes_cluster_node_pool" => ["vnet_subnet_id", "pod_subnet_id"]
                .iter()
                .filter_map(|key| resource.get_string(key))
                .map(str::to_string)
                .collect(),
            "container_group" => resource
                .attributes
                .get("subnet_ids")
                .and_then(Value::as_list)
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    async fn wait_provisioned(
        &self,
        ctx: &WaitContext,
        id: &str,
        api_version: &'static str,
        interval: Duration,
    ) -> ProviderResult<Json> {
        Ok(provisioning::wait_for_provisioned(
            Arc::clone(&self.client),
            ctx,
            id,
            api_version,
            interval,
        )
        .await?)
    }

    // =========================================================================
    // Resource Operations
    // =========================================================================

    /// Read a resource by its ARM ID
    pub async fn read_resource(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> ProviderResult<State> {
        let config = self.config_for(id)?;
        let Some(identifier) = identifier else {
            return Ok(State::not_found(id.clone()));
        };

        let ctx = self.context(self.timeouts(config).read);
        self.read_arm(&ctx, config, id, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }

    async fn read_arm(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let body = within(
            ctx,
            &format!("GET {}", identifier),
            self.client.get(identifier, config.api_version),
        )
        .await?;
        let Some(body) = body else {
            return Ok(State::not_found(id.clone()));
        };

        let arm_id = AzureResourceId::parse(identifier)?;
        let mut attributes = flatten_body(config, &body);

        match config.placement {
            Placement::ResourceGroup { .. } => {
                attributes.insert("name".to_string(), Value::String(arm_id.name().to_string()));
                attributes.insert(
                    "resource_group_name".to_string(),
                    Value::String(arm_id.resource_group.clone()),
                );
            }
            Placement::Child {
                parent_attribute, ..
            } => {
                attributes.insert("name".to_string(), Value::String(arm_id.name().to_string()));
                if let Some(parent) = arm_id.parent() {
                    attributes.insert(
                        parent_attribute.to_string(),
                        Value::String(parent.to_string()),
                    );
                }
            }
            Placement::TaskRun { task_attribute } => {
                // The run only names its task; rebuild the ID from the registry
                if let (Some(registry), Some(task)) = (
                    arm_id.parent(),
                    body.pointer("/properties/task").and_then(Json::as_str),
                ) {
                    attributes.insert(
                        task_attribute.to_string(),
                        Value::String(registry.child("tasks", task).to_string()),
                    );
                }
            }
        }

        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    /// Create a resource and wait for it to finish provisioning
    pub async fn create_resource(&self, resource: Resource) -> ProviderResult<State> {
        let config = self.config_for(&resource.id)?;
        let ctx = self.context(self.timeouts(config).create);
        self.create_arm(&ctx, config, &resource)
            .await
            .map_err(|e| e.for_resource(resource.id.clone()))
    }

    async fn create_arm(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        resource: &Resource,
    ) -> ProviderResult<State> {
        if let Placement::TaskRun { task_attribute } = config.placement {
            return self.schedule_run(ctx, resource, task_attribute).await;
        }

        self.validate_addons(resource)?;
        let arm_id = self.arm_id(config, resource)?;
        let body = expand_attributes(config, &resource.attributes)?;

        let _guards = self.locks.lock_all(Self::subnet_lock_keys(resource)).await;

        info!("Creating {} ({})", resource.id, arm_id);
        within(
            ctx,
            &format!("PUT {}", arm_id),
            self.client.put(&arm_id, config.api_version, body),
        )
        .await?;
        self.wait_provisioned(ctx, &arm_id, config.api_version, self.settings.provisioning_interval)
            .await?;

        if resource.id.resource_type == "kubernetes_cluster_node_pool"
            && let Some(subnet_id) = resource.get_string("vnet_subnet_id")
        {
            // Adding a pool updates the subnet and its virtual network; both
            // must settle before the subnet lock is released
            let subnet = AzureResourceId::parse(subnet_id)?;
            self.wait_provisioned(
                ctx,
                subnet_id,
                provisioning::NETWORK_API_VERSION,
                self.settings.settle_interval,
            )
            .await?;
            if let Some(vnet) = subnet.parent() {
                self.wait_provisioned(
                    ctx,
                    &vnet.to_string(),
                    provisioning::NETWORK_API_VERSION,
                    self.settings.settle_interval,
                )
                .await?;
            }
        }

        self.read_arm(ctx, config, &resource.id, &arm_id).await
    }

    /// Schedule a run of a registry task and wait for it to succeed
    async fn schedule_run(
        &self,
        ctx: &WaitContext,
        resource: &Resource,
        task_attribute: &'static str,
    ) -> ProviderResult<State> {
        let task_id = resource.get_string(task_attribute).ok_or_else(|| {
            ProviderError::new(format!("Missing required attribute '{}'", task_attribute))
        })?;
        let registry = AzureResourceId::parse(task_id)?
            .parent()
            .ok_or_else(|| {
                ProviderError::new(format!("{} is not a container registry task ID", task_id))
            })?
            .to_string();

        info!("Scheduling a run of {}", task_id);
        let response = within(
            ctx,
            &format!("POST {}/scheduleRun", registry),
            self.client.post(
                &registry,
                "scheduleRun",
                REGISTRY_TASK_API_VERSION,
                json!({ "type": "TaskRunRequest", "taskId": task_id }),
            ),
        )
        .await?
        .unwrap_or(Json::Null);

        let run_name = response
            .pointer("/properties/runId")
            .or_else(|| response.get("name"))
            .and_then(Json::as_str)
            .ok_or_else(|| {
                ProviderError::new(format!(
                    "Scheduling a run of {} returned no run ID",
                    task_id
                ))
            })?;
        let run_id = run::run_id(&registry, run_name);

        let body =
            run::wait_for_run(Arc::clone(&self.client), ctx, &run_id, self.settings.run_interval)
                .await?;

        let mut attributes = resource.attributes.clone();
        attributes.insert("run_id".to_string(), Value::String(run_name.to_string()));
        if let Some(status) = body.pointer("/properties/status").and_then(Json::as_str) {
            attributes.insert("status".to_string(), Value::String(status.to_string()));
        }
        Ok(State::existing(resource.id.clone(), attributes).with_identifier(run_id))
    }

    /// Update a resource, sending only the attributes that changed
    pub async fn update_resource(
        &self,
        id: ResourceId,
        identifier: &str,
        from: &State,
        to: Resource,
    ) -> ProviderResult<State> {
        let config = self.config_for(&id)?;

        if !config.supports_update {
            return Err(ProviderError::new(format!(
                "Update not supported for {}, delete and recreate",
                id.resource_type
            ))
            .for_resource(id));
        }
        if !from.exists {
            return Err(
                ProviderError::new(format!("{} does not exist", identifier)).for_resource(id)
            );
        }

        let mut changed = diff(&to, from).changed_attributes().to_vec();
        // DSL enum spellings ("Sku.Premium") match their ARM values ("Premium")
        changed.retain(|key| match (to.attributes.get(key), from.attributes.get(key)) {
            (Some(desired), Some(current)) => {
                attribute_to_json(key, desired) != attribute_to_json(key, current)
            }
            _ => true,
        });
        // "West Europe" and "westeurope" name the same region
        if let (Some(desired), Some(current)) =
            (to.get_string("location"), from.get_string("location"))
            && normalize_location(desired) == normalize_location(current)
        {
            changed.retain(|c| c != "location");
        }
        if changed.is_empty() {
            debug!("No changes for {}", id);
            return Ok(from.clone());
        }

        let ctx = self.context(self.timeouts(config).update);
        self.update_arm(&ctx, config, identifier, &to, &changed)
            .await
            .map_err(|e| e.for_resource(id))
    }

    async fn update_arm(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        identifier: &str,
        to: &Resource,
        changed: &[String],
    ) -> ProviderResult<State> {
        self.validate_addons(to)?;

        if to.id.resource_type == "container_registry_replication"
            && changed.iter().any(|c| c == "location")
        {
            return self.replace_replication(ctx, config, identifier, to).await;
        }

        info!("Updating {} ({}): {}", to.id, identifier, changed.join(", "));
        let changes = expand_changes(config, &to.attributes, changed)?;
        let _guards = self.locks.lock_all(Self::subnet_lock_keys(to)).await;
        match config.update_strategy {
            UpdateStrategy::TagsPatchOrMergePut if changed.iter().all(|c| c == "tags") => {
                self.patch(ctx, config, identifier, changes).await?
            }
            UpdateStrategy::Patch => self.patch(ctx, config, identifier, changes).await?,
            UpdateStrategy::MergePut | UpdateStrategy::TagsPatchOrMergePut => {
                self.merge_put(ctx, config, identifier, changes).await?
            }
        }
        self.wait_provisioned(
            ctx,
            identifier,
            config.api_version,
            self.settings.provisioning_interval,
        )
        .await?;

        self.read_arm(ctx, config, &to.id, identifier).await
    }

    async fn patch(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        identifier: &str,
        changes: Json,
    ) -> ProviderResult<()> {
        within(
            ctx,
            &format!("PATCH {}", identifier),
            self.client.patch(identifier, config.api_version, changes),
        )
        .await?;
        Ok(())
    }

    /// Apply `changes` on top of the current resource and PUT the whole body back
    async fn merge_put(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        identifier: &str,
        changes: Json,
    ) -> ProviderResult<()> {
        let existing = within(
            ctx,
            &format!("GET {}", identifier),
            self.client.get(identifier, config.api_version),
        )
        .await?;
        let Some(mut body) = existing else {
            return Err(ProviderError::new(format!("{} no longer exists", identifier)));
        };
        merge_body(&mut body, changes);
        within(
            ctx,
            &format!("PUT {}", identifier),
            self.client.put(identifier, config.api_version, body),
        )
        .await?;
        Ok(())
    }

    /// A replication cannot move; delete it, wait until it is gone, create it again
    async fn replace_replication(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        identifier: &str,
        to: &Resource,
    ) -> ProviderResult<State> {
        info!("Relocating registry replication {}", identifier);
        within(
            ctx,
            &format!("DELETE {}", identifier),
            self.client.delete(identifier, config.api_version),
        )
        .await?;
        replication::wait_for_replication_deleted(
            Arc::clone(&self.client),
            ctx,
            identifier,
            &self.settings.replication,
        )
        .await?;

        self.create_arm(ctx, config, to).await
    }

    /// Delete a resource and wait until it is gone
    pub async fn delete_resource(&self, id: &ResourceId, identifier: &str) -> ProviderResult<()> {
        let config = self.config_for(id)?;
        let ctx = self.context(self.timeouts(config).delete);
        self.delete_arm(&ctx, config, identifier)
            .await
            .map_err(|e| e.for_resource(id.clone()))
    }

    async fn delete_arm(
        &self,
        ctx: &WaitContext,
        config: &ResourceConfig,
        identifier: &str,
    ) -> ProviderResult<()> {
        match config.placement {
            // A finished run has nothing to delete
            Placement::TaskRun { .. } => {
                debug!("Forgetting registry task run {}", identifier);
                Ok(())
            }
            _ if config.resource_type == CONTAINER_GROUP_CONFIG.resource_type => {
                self.delete_container_group(ctx, identifier).await
            }
            _ => {
                info!("Deleting {}", identifier);
                within(
                    ctx,
                    &format!("DELETE {}", identifier),
                    self.client.delete(identifier, config.api_version),
                )
                .await?;
                provisioning::wait_for_deleted(
                    Arc::clone(&self.client),
                    ctx,
                    identifier,
                    config.api_version,
                    self.settings.deletion_interval,
                )
                .await?;
                Ok(())
            }
        }
    }

    /// Delete a container group and wait for its network profile to let go
    ///
    /// The subnets and the network profile stay locked until the profile no
    /// longer references the group, so nothing else can delete them early.
    async fn delete_container_group(
        &self,
        ctx: &WaitContext,
        identifier: &str,
    ) -> ProviderResult<()> {
        let config = &CONTAINER_GROUP_CONFIG;
        let existing = within(
            ctx,
            &format!("GET {}", identifier),
            self.client.get(identifier, config.api_version),
        )
        .await?;
        let Some(existing) = existing else {
            info!("Container group {} is already deleted", identifier);
            return Ok(());
        };

        let group = AzureResourceId::parse(identifier)?;
        let subnets: Vec<String> = existing
            .pointer("/properties/subnetIds")
            .and_then(Json::as_array)
            .into_iter()
            .flatten()
            .filter_map(|s| s.get("id").and_then(Json::as_str))
            .map(str::to_string)
            .collect();
        let network_profile = existing
            .pointer("/properties/networkProfile/id")
            .and_then(Json::as_str)
            .map(str::to_string);

        let _guards = self
            .locks
            .lock_all(subnets.iter().chain(network_profile.iter()))
            .await;

        info!("Deleting container group {}", identifier);
        within(
            ctx,
            &format!("DELETE {}", identifier),
            self.client.delete(identifier, config.api_version),
        )
        .await?;
        provisioning::wait_for_deleted(
            Arc::clone(&self.client),
            ctx,
            identifier,
            config.api_version,
            self.settings.deletion_interval,
        )
        .await?;

        if let Some(profile) = &network_profile {
            detachment::wait_for_detachment(
                Arc::clone(&self.client),
                ctx,
                profile,
                &group,
                &self.settings.detachment,
            )
            .await?;
        }
        Ok(())
    }
}
