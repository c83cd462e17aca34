//! `properties.provisioningState` of any ARM resource

use std::sync::Arc;
use std::time::Duration;

use carina_core::convergence::{
    ConvergencePolicy, FetchError, PolicyError, WaitContext, WaitError,
};
use serde_json::Value as Json;

use super::{FetchFuture, arm_fetch, run_wait};
use crate::arm::ArmClient;

pub const NETWORK_API_VERSION: &str = "2023-09-01";

pub const SUCCEEDED: &str = "Succeeded";
pub const DELETING: &str = "Deleting";
pub const DELETED: &str = "Deleted";

/// Transitional states ARM reports while a change is being applied
pub const IN_FLIGHT: [&str; 9] = [
    "Accepted",
    "Creating",
    "Updating",
    "Scaling",
    "Upgrading",
    "Starting",
    "Stopping",
    "InProgress",
    "Migrating",
];

/// Wait for a create or update to reach `Succeeded`
pub fn policy(interval: Duration) -> Result<ConvergencePolicy, PolicyError> {
    ConvergencePolicy::builder()
        .pending(IN_FLIGHT)
        .target([SUCCEEDED])
        .min_poll_interval(interval)
        .build()
}

/// Wait for a deleted resource to go away
pub fn deletion_policy(interval: Duration) -> Result<ConvergencePolicy, PolicyError> {
    ConvergencePolicy::builder()
        .pending(IN_FLIGHT)
        .pending([DELETING, SUCCEEDED])
        .target([DELETED])
        .min_poll_interval(interval)
        .disappearance()
        .build()
}

/// Resources that do not report a provisioning state are ready once readable
pub fn classify(body: &Json) -> Result<String, FetchError> {
    Ok(body
        .pointer("/properties/provisioningState")
        .and_then(Json::as_str)
        .unwrap_or(SUCCEEDED)
        .to_string())
}

pub fn fetch(
    client: Arc<dyn ArmClient>,
    id: &str,
    api_version: &'static str,
) -> impl FnMut() -> FetchFuture {
    arm_fetch(client, id.to_string(), api_version, classify)
}

/// Block until `id` reports `Succeeded`; returns the final body
pub async fn wait_for_provisioned(
    client: Arc<dyn ArmClient>,
    ctx: &WaitContext,
    id: &str,
    api_version: &'static str,
    interval: Duration,
) -> Result<Json, WaitError> {
    let body = run_wait(id, policy(interval), ctx, fetch(client, id, api_version)).await?;
    Ok(body.unwrap_or(Json::Null))
}

/// Block until `id` no longer exists
pub async fn wait_for_deleted(
    client: Arc<dyn ArmClient>,
    ctx: &WaitContext,
    id: &str,
    api_version: &'static str,
    interval: Duration,
) -> Result<(), WaitError> {
    run_wait(
        &format!("deletion of {}", id),
        deletion_policy(interval),
        ctx,
        fetch(client, id, api_version),
    )
    .await
    .map(|_| ())
}
