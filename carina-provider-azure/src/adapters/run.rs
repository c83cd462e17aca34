//! Completion of a scheduled container registry task run

use std::sync::Arc;
use std::time::Duration;

use carina_core::convergence::{
    ConvergencePolicy, FetchError, PolicyError, WaitContext, WaitError,
};
use serde_json::Value as Json;

use super::{FetchFuture, arm_fetch, run_wait};
use crate::arm::ArmClient;
use crate::resources::REGISTRY_TASK_API_VERSION;

pub const PENDING: [&str; 3] = ["Queued", "Started", "Running"];
pub const SUCCEEDED: &str = "Succeeded";

/// Reads of a just-scheduled run that may 404 before ARM has indexed it
const NOT_FOUND_BUDGET: u32 = 3;

/// Any status other than the pending ones and `Succeeded` (`Failed`,
/// `Canceled`, `Error`, `Timeout`) ends the wait as a failure.
pub fn policy(interval: Duration) -> Result<ConvergencePolicy, PolicyError> {
    ConvergencePolicy::builder()
        .pending(PENDING)
        .target([SUCCEEDED])
        .min_poll_interval(interval)
        .not_found_budget(NOT_FOUND_BUDGET)
        .build()
}

/// `properties.status` of a run body
pub fn classify(run: &Json) -> Result<String, FetchError> {
    run.pointer("/properties/status")
        .and_then(Json::as_str)
        .map(str::to_string)
        .ok_or_else(|| FetchError::transient("run has no status yet"))
}

/// ID of run `run_id` on the registry `registry_id`
pub fn run_id(registry_id: &str, run_id: &str) -> String {
    format!("{}/runs/{}", registry_id.trim_end_matches('/'), run_id)
}

pub fn fetch(client: Arc<dyn ArmClient>, run_id: &str) -> impl FnMut() -> FetchFuture {
    arm_fetch(client, run_id.to_string(), REGISTRY_TASK_API_VERSION, classify)
}

/// Block until the run succeeds; returns the final run body
pub async fn wait_for_run(
    client: Arc<dyn ArmClient>,
    ctx: &WaitContext,
    run_id: &str,
    interval: Duration,
) -> Result<Json, WaitError> {
    let body = run_wait(
        &format!("registry task run {}", run_id),
        policy(interval),
        ctx,
        fetch(client, run_id),
    )
    .await?;
    Ok(body.unwrap_or(Json::Null))
}
