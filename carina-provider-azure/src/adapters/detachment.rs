//! Network profile detachment after a container group is deleted
//!
//! ARM reports the container group as deleted before its network interface
//! has been released from the network profile. Deleting the profile or the
//! subnet in that window fails, so the delete waits until the profile has
//! stopped referencing the group for several reads in a row.

use std::sync::Arc;

use carina_core::convergence::{
    ConvergencePolicy, FetchError, PolicyError, WaitContext, WaitError,
};
use serde_json::Value as Json;

use super::{DetachmentSettings, FetchFuture, arm_fetch, run_wait};
use crate::arm::ArmClient;
use crate::resource_id::AzureResourceId;

pub const NETWORK_PROFILE_API_VERSION: &str = "2020-11-01";

pub const ATTACHED: &str = "Attached";
pub const DETACHED: &str = "Detached";

pub fn policy(settings: &DetachmentSettings) -> Result<ConvergencePolicy, PolicyError> {
    ConvergencePolicy::builder()
        .pending([ATTACHED])
        .target([DETACHED])
        .min_poll_interval(settings.interval)
        .required_consecutive_targets(settings.consecutive_detached)
        .not_found_budget(settings.not_found_budget)
        .disappearance()
        .build()
}

/// Label a network profile body by whether any of its container NICs
/// belongs to `container_group`
pub fn classify(profile: &Json, container_group: &AzureResourceId) -> Result<String, FetchError> {
    let nics = profile
        .pointer("/properties/containerNetworkInterfaces")
        .and_then(Json::as_array);

    for nic in nics.into_iter().flatten() {
        let Some(container_id) = nic.pointer("/properties/container/id").and_then(Json::as_str)
        else {
            continue;
        };
        let parsed = AzureResourceId::parse(container_id)
            .map_err(|e| FetchError::fatal(e.to_string()).with_source(e))?;

        let same_group = parsed
            .resource_group
            .eq_ignore_ascii_case(&container_group.resource_group);
        let same_name = parsed
            .segment("containerGroups")
            .is_some_and(|name| name.eq_ignore_ascii_case(container_group.name()));
        if same_group && same_name {
            return Ok(ATTACHED.to_string());
        }
    }
    Ok(DETACHED.to_string())
}

pub fn fetch(
    client: Arc<dyn ArmClient>,
    network_profile_id: &str,
    container_group: AzureResourceId,
) -> impl FnMut() -> FetchFuture {
    let container_group = Arc::new(container_group);
    arm_fetch(
        client,
        network_profile_id.to_string(),
        NETWORK_PROFILE_API_VERSION,
        move |body| classify(body, &container_group),
    )
}

/// Block until `network_profile_id` no longer references `container_group`
pub async fn wait_for_detachment(
    client: Arc<dyn ArmClient>,
    ctx: &WaitContext,
    network_profile_id: &str,
    container_group: &AzureResourceId,
    settings: &DetachmentSettings,
) -> Result<(), WaitError> {
    let resource = format!(
        "detachment of container group {} from network profile {}",
        container_group.name(),
        network_profile_id
    );
    run_wait(
        &resource,
        policy(settings),
        ctx,
        fetch(client, network_profile_id, container_group.clone()),
    )
    .await
    .map(|_| ())
}
