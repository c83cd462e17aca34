//! Convergence adapters for the Azure resources this provider manages
//!
//! Each adapter pairs a [`ConvergencePolicy`] constructor with a fetch
//! function that reads one ARM resource and labels it with a state. The
//! policy parameters live in [`WaitSettings`] so callers and tests can tune
//! pacing without touching the classification logic.
//!
//! [`ConvergencePolicy`]: carina_core::convergence::ConvergencePolicy

pub mod detachment;
pub mod provisioning;
pub mod replication;
pub mod run;

use std::sync::Arc;
use std::time::Duration;

use carina_core::convergence::{
    ConvergencePolicy, FetchError, Observation, PolicyError, Poller, WaitContext, WaitError,
};
use carina_core::provider::BoxFuture;
use serde_json::Value as Json;

use crate::arm::ArmClient;

/// Future returned by every adapter's fetch function
pub type FetchFuture = BoxFuture<'static, Result<Observation<Json>, FetchError>>;

/// Pacing of the detachment wait after a container group is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetachmentSettings {
    pub interval: Duration,
    pub consecutive_detached: u32,
    /// Not-found reads of the network profile tolerated before it counts as gone
    pub not_found_budget: u32,
}

impl Default for DetachmentSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            consecutive_detached: 5,
            not_found_budget: 40,
        }
    }
}

/// Pacing of the replication deletion wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationSettings {
    pub interval: Duration,
    pub not_found_budget: u32,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            not_found_budget: 4,
        }
    }
}

/// Policy parameters for every wait the provider performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSettings {
    pub detachment: DetachmentSettings,
    pub replication: ReplicationSettings,
    /// Interval while a create or update settles
    pub provisioning_interval: Duration,
    /// Interval while a subnet or virtual network settles after a node pool change
    pub settle_interval: Duration,
    /// Interval while a resource is being deleted
    pub deletion_interval: Duration,
    /// Interval while a scheduled registry task run executes
    pub run_interval: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            detachment: DetachmentSettings::default(),
            replication: ReplicationSettings::default(),
            provisioning_interval: Duration::from_secs(10),
            settle_interval: Duration::from_secs(60),
            deletion_interval: Duration::from_secs(10),
            run_interval: Duration::from_secs(10),
        }
    }
}

/// Fetch function that GETs `id` and labels the body with `classify`
///
/// A 404 is reported as [`Observation::NotFound`]; the caller's policy
/// decides what that means.
pub(crate) fn arm_fetch<C>(
    client: Arc<dyn ArmClient>,
    id: String,
    api_version: &'static str,
    classify: C,
) -> impl FnMut() -> FetchFuture
where
    C: Fn(&Json) -> Result<String, FetchError> + Clone + Send + Sync + 'static,
{
    move || {
        let client = Arc::clone(&client);
        let id = id.clone();
        let classify = classify.clone();
        Box::pin(async move {
            match client.get(&id, api_version).await {
                Ok(Some(body)) => {
                    let state = classify(&body)?;
                    Ok::<_, FetchError>(Observation::found(body, state))
                }
                Ok(None) => Ok(Observation::NotFound),
                Err(e) => Err(e.into()),
            }
        })
    }
}

/// Build the policy and run the wait, attributing errors to `resource`
pub(crate) async fn run_wait<F>(
    resource: &str,
    policy: Result<ConvergencePolicy, PolicyError>,
    ctx: &WaitContext,
    fetch: F,
) -> Result<Option<Json>, WaitError>
where
    F: FnMut() -> FetchFuture,
{
    let policy = policy.map_err(|e| WaitError::policy(resource, e))?;
    Poller::new(resource, policy).wait_for(ctx, fetch).await
}
