//! Resource type configurations for Azure Resource Manager
//!
//! This module defines:
//! - Resource type definitions (implementing ResourceType trait)
//! - Mapping between DSL resource types and ARM resource types
//! - Per-type operation timeouts

use std::time::Duration;

use carina_core::provider::ResourceType;

// =============================================================================
// Resource Type Definitions
// =============================================================================

macro_rules! define_resource_type {
    ($name:ident, $type_name:expr) => {
        pub struct $name;
        impl ResourceType for $name {
            fn name(&self) -> &'static str {
                $type_name
            }
            fn supports_update(&self) -> bool {
                get_resource_config($type_name).is_some_and(|c| c.supports_update)
            }
        }
    };
}

define_resource_type!(ContainerGroupType, "container_group");
define_resource_type!(ContainerRegistryType, "container_registry");
define_resource_type!(
    ContainerRegistryReplicationType,
    "container_registry_replication"
);
define_resource_type!(ContainerRegistryTaskType, "container_registry_task");
define_resource_type!(
    ContainerRegistryTaskScheduleRunNowType,
    "container_registry_task_schedule_run_now"
);
define_resource_type!(ContainerConnectedRegistryType, "container_connected_registry");
define_resource_type!(
    ContainerRegistryCredentialSetType,
    "container_registry_credential_set"
);
define_resource_type!(KubernetesClusterType, "kubernetes_cluster");
define_resource_type!(KubernetesClusterNodePoolType, "kubernetes_cluster_node_pool");

/// Returns all resource types supported by this provider
pub fn resource_types() -> Vec<Box<dyn ResourceType>> {
    vec![
        Box::new(ContainerGroupType),
        Box::new(ContainerRegistryType),
        Box::new(ContainerRegistryReplicationType),
        Box::new(ContainerRegistryTaskType),
        Box::new(ContainerRegistryTaskScheduleRunNowType),
        Box::new(ContainerConnectedRegistryType),
        Box::new(ContainerRegistryCredentialSetType),
        Box::new(KubernetesClusterType),
        Box::new(KubernetesClusterNodePoolType),
    ]
}

// =============================================================================
// Operation Timeouts
// =============================================================================

/// Upper bound for each CRUD operation, including any convergence waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationTimeouts {
    pub create: Duration,
    pub read: Duration,
    pub update: Duration,
    pub delete: Duration,
}

impl OperationTimeouts {
    pub const fn minutes(create: u64, read: u64, update: u64, delete: u64) -> Self {
        Self {
            create: Duration::from_secs(create * 60),
            read: Duration::from_secs(read * 60),
            update: Duration::from_secs(update * 60),
            delete: Duration::from_secs(delete * 60),
        }
    }
}

const CONTAINER_GROUP_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(60, 5, 30, 30);
const REGISTRY_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(30, 5, 30, 30);
const NODE_POOL_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(60, 5, 60, 60);
const CLUSTER_TIMEOUTS: OperationTimeouts = OperationTimeouts::minutes(90, 5, 90, 90);

// =============================================================================
// Resource Configuration
// =============================================================================

/// Where a resource lives in the ARM hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Directly inside a resource group, e.g. `Microsoft.ContainerRegistry/registries`
    ResourceGroup { provider_type: &'static str },
    /// Below the resource whose ID is held in `parent_attribute`
    Child {
        parent_attribute: &'static str,
        segment: &'static str,
    },
    /// A one-shot run scheduled on a registry task; nothing is PUT
    TaskRun { task_attribute: &'static str },
}

/// How an update is sent to ARM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStrategy {
    /// PATCH a body holding only the changed attributes
    Patch,
    /// GET the resource, merge the changes into it and PUT it back
    MergePut,
    /// PATCH when only `tags` changed, otherwise as `MergePut`
    TagsPatchOrMergePut,
}

/// Resource type configuration
#[derive(Debug)]
pub struct ResourceConfig {
    pub resource_type: &'static str,
    pub placement: Placement,
    pub api_version: &'static str,
    /// Whether the body carries top-level `tags`
    pub has_tags: bool,
    /// Whether the body carries top-level `location`
    pub has_location: bool,
    pub supports_update: bool,
    pub update_strategy: UpdateStrategy,
    pub timeouts: OperationTimeouts,
}

pub const REGISTRY_API_VERSION: &str = "2023-07-01";
pub const REGISTRY_TASK_API_VERSION: &str = "2019-06-01-preview";
pub const MANAGED_CLUSTER_API_VERSION: &str = "2023-06-01";

// =============================================================================
// Container Instance Resources
// =============================================================================

pub const CONTAINER_GROUP_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_group",
    placement: Placement::ResourceGroup {
        provider_type: "Microsoft.ContainerInstance/containerGroups",
    },
    api_version: "2023-05-01",
    has_tags: true,
    has_location: true,
    supports_update: true,
    update_strategy: UpdateStrategy::TagsPatchOrMergePut,
    timeouts: CONTAINER_GROUP_TIMEOUTS,
};

// =============================================================================
// Container Registry Resources
// =============================================================================

pub const CONTAINER_REGISTRY_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_registry",
    placement: Placement::ResourceGroup {
        provider_type: "Microsoft.ContainerRegistry/registries",
    },
    api_version: REGISTRY_API_VERSION,
    has_tags: true,
    has_location: true,
    supports_update: true,
    update_strategy: UpdateStrategy::Patch,
    timeouts: REGISTRY_TIMEOUTS,
};

pub const CONTAINER_REGISTRY_REPLICATION_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_registry_replication",
    placement: Placement::Child {
        parent_attribute: "container_registry_id",
        segment: "replications",
    },
    api_version: REGISTRY_API_VERSION,
    has_tags: true,
    has_location: true,
    supports_update: true,
    update_strategy: UpdateStrategy::Patch,
    timeouts: REGISTRY_TIMEOUTS,
};

pub const CONTAINER_REGISTRY_TASK_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_registry_task",
    placement: Placement::Child {
        parent_attribute: "container_registry_id",
        segment: "tasks",
    },
    api_version: REGISTRY_TASK_API_VERSION,
    has_tags: true,
    has_location: true,
    supports_update: true,
    update_strategy: UpdateStrategy::Patch,
    timeouts: REGISTRY_TIMEOUTS,
};

pub const CONTAINER_REGISTRY_TASK_SCHEDULE_RUN_NOW_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_registry_task_schedule_run_now",
    placement: Placement::TaskRun {
        task_attribute: "container_registry_task_id",
    },
    api_version: REGISTRY_TASK_API_VERSION,
    has_tags: false,
    has_location: false,
    supports_update: false,
    update_strategy: UpdateStrategy::Patch,
    timeouts: REGISTRY_TIMEOUTS,
};

pub const CONTAINER_CONNECTED_REGISTRY_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_connected_registry",
    placement: Placement::Child {
        parent_attribute: "container_registry_id",
        segment: "connectedRegistries",
    },
    api_version: REGISTRY_API_VERSION,
    has_tags: false,
    has_location: false,
    supports_update: true,
    update_strategy: UpdateStrategy::Patch,
    timeouts: REGISTRY_TIMEOUTS,
};

pub const CONTAINER_REGISTRY_CREDENTIAL_SET_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "container_registry_credential_set",
    placement: Placement::Child {
        parent_attribute: "container_registry_id",
        segment: "credentialSets",
    },
    api_version: REGISTRY_API_VERSION,
    has_tags: false,
    has_location: false,
    supports_update: true,
    update_strategy: UpdateStrategy::Patch,
    timeouts: REGISTRY_TIMEOUTS,
};

// =============================================================================
// Kubernetes Resources
// =============================================================================

pub const KUBERNETES_CLUSTER_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "kubernetes_cluster",
    placement: Placement::ResourceGroup {
        provider_type: "Microsoft.ContainerService/managedClusters",
    },
    api_version: MANAGED_CLUSTER_API_VERSION,
    has_tags: true,
    has_location: true,
    supports_update: true,
    update_strategy: UpdateStrategy::MergePut,
    timeouts: CLUSTER_TIMEOUTS,
};

pub const KUBERNETES_CLUSTER_NODE_POOL_CONFIG: ResourceConfig = ResourceConfig {
    resource_type: "kubernetes_cluster_node_pool",
    placement: Placement::Child {
        parent_attribute: "kubernetes_cluster_id",
        segment: "agentPools",
    },
    api_version: MANAGED_CLUSTER_API_VERSION,
    has_tags: false,
    has_location: false,
    supports_update: true,
    update_strategy: UpdateStrategy::MergePut,
    timeouts: NODE_POOL_TIMEOUTS,
};

// =============================================================================
// Config Lookup
// =============================================================================

/// Get resource configuration by DSL type name
pub fn get_resource_config(resource_type: &str) -> Option<&'static ResourceConfig> {
    match resource_type {
        "container_group" => Some(&CONTAINER_GROUP_CONFIG),
        "container_registry" => Some(&CONTAINER_REGISTRY_CONFIG),
        "container_registry_replication" => Some(&CONTAINER_REGISTRY_REPLICATION_CONFIG),
        "container_registry_task" => Some(&CONTAINER_REGISTRY_TASK_CONFIG),
        "container_registry_task_schedule_run_now" => {
            Some(&CONTAINER_REGISTRY_TASK_SCHEDULE_RUN_NOW_CONFIG)
        }
        "container_connected_registry" => Some(&CONTAINER_CONNECTED_REGISTRY_CONFIG),
        "container_registry_credential_set" => Some(&CONTAINER_REGISTRY_CREDENTIAL_SET_CONFIG),
        "kubernetes_cluster" => Some(&KUBERNETES_CLUSTER_CONFIG),
        "kubernetes_cluster_node_pool" => Some(&KUBERNETES_CLUSTER_NODE_POOL_CONFIG),
        _ => None,
    }
}

impl ResourceConfig {
    /// DSL attribute holding the parent resource ID, for nested types
    pub fn parent_attribute(&self) -> Option<&'static str> {
        match self.placement {
            Placement::Child {
                parent_attribute, ..
            } => Some(parent_attribute),
            Placement::TaskRun { task_attribute } => Some(task_attribute),
            Placement::ResourceGroup { .. } => None,
        }
    }
}
