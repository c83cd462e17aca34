//! Disappearance of a container registry replication
//!
//! A replication keeps answering GETs for a while after its DELETE returned.
//! Re-creating it in another location before it is gone fails, so the
//! provider waits for several not-found reads in a row first.

use std::sync::Arc;

use carina_core::convergence::{
    ConvergencePolicy, NOT_FOUND_STATE, PolicyError, WaitContext, WaitError,
};

use super::{FetchFuture, ReplicationSettings, arm_fetch, run_wait};
use crate::arm::ArmClient;
use crate::resources::REGISTRY_API_VERSION;

pub const IN_PROGRESS: &str = "InProgress";

pub fn policy(settings: &ReplicationSettings) -> Result<ConvergencePolicy, PolicyError> {
    ConvergencePolicy::builder()
        .pending([IN_PROGRESS])
        .target([NOT_FOUND_STATE])
        .min_poll_interval(settings.interval)
        .not_found_budget(settings.not_found_budget)
        .disappearance()
        .build()
}

/// Every found replication is still being deleted
pub fn fetch(client: Arc<dyn ArmClient>, replication_id: &str) -> impl FnMut() -> FetchFuture {
    arm_fetch(
        client,
        replication_id.to_string(),
        REGISTRY_API_VERSION,
        |_| Ok(IN_PROGRESS.to_string()),
    )
}

pub async fn wait_for_replication_deleted(
    client: Arc<dyn ArmClient>,
    ctx: &WaitContext,
    replication_id: &str,
    settings: &ReplicationSettings,
) -> Result<(), WaitError> {
    run_wait(
        &format!("deletion of registry replication {}", replication_id),
        policy(settings),
        ctx,
        fetch(client, replication_id),
    )
    .await
    .map(|_| ())
}
