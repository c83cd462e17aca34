//! Poller - repeatedly read a remote resource until its policy is satisfied

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{Instant, sleep_until};

use crate::convergence::context::WaitContext;
use crate::convergence::error::{Failure, FetchError, WaitError};
use crate::convergence::policy::{ConvergencePolicy, Purpose};

/// Label recorded as the last status when a read found nothing
pub const NOT_FOUND_STATE: &str = "NotFound";

/// Result of one remote read
#[derive(Debug, Clone, PartialEq)]
pub enum Observation<T> {
    Found { value: T, state: String },
    NotFound,
}

impl<T> Observation<T> {
    pub fn found(value: T, state: impl Into<String>) -> Self {
        Observation::Found {
            value,
            state: state.into(),
        }
    }
}

/// Terminal result of a wait
#[derive(Debug)]
pub enum PollOutcome<T> {
    Succeeded(T),
    Failed {
        failure: Failure,
        last_state: Option<String>,
    },
    TimedOut {
        elapsed: Duration,
        budget: Duration,
        last_state: Option<String>,
    },
    Cancelled {
        elapsed: Duration,
        last_state: Option<String>,
    },
}

impl<T> PollOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded(_))
    }

    pub fn into_result(self, resource: impl Into<String>) -> Result<T, WaitError> {
        let resource = resource.into();
        match self {
            PollOutcome::Succeeded(value) => Ok(value),
            PollOutcome::Failed {
                failure,
                last_state,
            } => Err(WaitError::Failed {
                resource,
                last_state,
                failure,
            }),
            PollOutcome::TimedOut {
                elapsed,
                budget,
                last_state,
            } => Err(WaitError::TimedOut {
                resource,
                elapsed,
                budget,
                last_state,
            }),
            PollOutcome::Cancelled {
                elapsed,
                last_state,
            } => Err(WaitError::Cancelled {
                resource,
                elapsed,
                last_state,
            }),
        }
    }
}

/// Counters that survive from one tick to the next
#[derive(Debug)]
struct Progress {
    started: Instant,
    ticks: u32,
    consecutive_targets: u32,
    not_found: u32,
    last_state: Option<String>,
}

impl Progress {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            ticks: 0,
            consecutive_targets: 0,
            not_found: 0,
            last_state: None,
        }
    }

    fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started)
    }

    fn failed<T>(&self, failure: Failure) -> PollOutcome<T> {
        PollOutcome::Failed {
            failure,
            last_state: self.last_state.clone(),
        }
    }

    fn timed_out<T>(&self, budget: Duration) -> PollOutcome<T> {
        PollOutcome::TimedOut {
            elapsed: self.elapsed(),
            budget,
            last_state: self.last_state.clone(),
        }
    }

    fn cancelled<T>(&self) -> PollOutcome<T> {
        PollOutcome::Cancelled {
            elapsed: self.elapsed(),
            last_state: self.last_state.clone(),
        }
    }
}

/// Drives a fetch function until a [`ConvergencePolicy`] is satisfied
///
/// The poller owns no client and no shared state: every wait is independent,
/// reads are strictly sequential, and nothing is read after a terminal
/// outcome.
#[derive(Debug, Clone)]
pub struct Poller {
    resource: String,
    policy: ConvergencePolicy,
}

impl Poller {
    /// `resource` names what is being waited on in logs and errors
    pub fn new(resource: impl Into<String>, policy: ConvergencePolicy) -> Self {
        Self {
            resource: resource.into(),
            policy,
        }
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn policy(&self) -> &ConvergencePolicy {
        &self.policy
    }

    /// Like [`wait`](Self::wait), converting the outcome into an error naming the resource
    pub async fn wait_for<T, F, Fut>(
        &self,
        ctx: &WaitContext,
        fetch: F,
    ) -> Result<Option<T>, WaitError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>, FetchError>>,
    {
        self.wait(ctx, fetch).await.into_result(self.resource.clone())
    }

    /// Poll until the policy is satisfied, a fatal error occurs, the deadline
    /// passes or `ctx` is cancelled.
    ///
    /// Succeeds with `Some(value)` when a target state was observed often
    /// enough, and with `None` when a disappearance policy ran out of its
    /// not-found budget.
    pub async fn wait<T, F, Fut>(&self, ctx: &WaitContext, mut fetch: F) -> PollOutcome<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T>, FetchError>>,
    {
        let mut progress = Progress::new();
        let deadline = match self.policy.timeout() {
            Some(timeout) => (progress.started + timeout).min(ctx.deadline()),
            None => ctx.deadline(),
        };
        let budget = deadline.saturating_duration_since(progress.started);
        let token = ctx.token();

        debug!(
            "Waiting up to {:?} for {} to reach {:?}",
            budget,
            self.resource,
            self.policy.target_states().collect::<Vec<_>>()
        );

        loop {
            if token.is_cancelled() {
                return self.finish(progress.cancelled());
            }
            if Instant::now() >= deadline {
                return self.finish(progress.timed_out(budget));
            }

            progress.ticks += 1;
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return self.finish(progress.cancelled()),
                _ = sleep_until(deadline) => return self.finish(progress.timed_out(budget)),
                result = fetch() => result,
            };

            match result {
                Err(err) if err.is_retryable() => {
                    warn!(
                        "Poll #{} of {} failed, retrying: {}",
                        progress.ticks, self.resource, err
                    );
                    progress.consecutive_targets = 0;
                }
                Err(err) => return self.finish(progress.failed(Failure::Fetch(err))),
                Ok(Observation::NotFound) => {
                    progress.not_found += 1;
                    progress.consecutive_targets = 0;
                    progress.last_state = Some(NOT_FOUND_STATE.to_string());
                    debug!(
                        "Poll #{} of {}: not found ({} of {} tolerated)",
                        progress.ticks,
                        self.resource,
                        progress.not_found,
                        self.policy.not_found_budget()
                    );

                    if progress.not_found > self.policy.not_found_budget() {
                        let outcome = match self.policy.purpose() {
                            Purpose::Disappearance => PollOutcome::Succeeded(None),
                            Purpose::StateChange => progress.failed(Failure::NotFound {
                                attempts: progress.not_found,
                            }),
                        };
                        return self.finish(outcome);
                    }
                }
                Ok(Observation::Found { value, state }) => {
                    debug!(
                        "Poll #{} of {}: status {}",
                        progress.ticks, self.resource, state
                    );
                    progress.not_found = 0;

                    if self.policy.is_pending(&state) {
                        progress.consecutive_targets = 0;
                        progress.last_state = Some(state);
                    } else if self.policy.is_target(&state) {
                        progress.consecutive_targets += 1;
                        progress.last_state = Some(state);
                        if progress.consecutive_targets
                            >= self.policy.required_consecutive_targets()
                        {
                            return self.finish(PollOutcome::Succeeded(Some(value)));
                        }
                    } else {
                        progress.last_state = Some(state.clone());
                        return self.finish(progress.failed(Failure::UnexpectedState { state }));
                    }
                }
            }

            let wake = (Instant::now() + self.policy.min_poll_interval()).min(deadline);
            tokio::select! {
                biased;
                _ = token.cancelled() => return self.finish(progress.cancelled()),
                _ = sleep_until(wake) => {}
            }
        }
    }

    fn finish<T>(&self, outcome: PollOutcome<T>) -> PollOutcome<T> {
        match &outcome {
            PollOutcome::Succeeded(_) => info!("{} converged", self.resource),
            PollOutcome::Failed { failure, .. } => {
                warn!("Waiting for {} failed: {}", self.resource, failure)
            }
            PollOutcome::TimedOut { elapsed, .. } => {
                warn!("Waiting for {} timed out after {:?}", self.resource, elapsed)
            }
            PollOutcome::Cancelled { elapsed, .. } => {
                info!("Waiting for {} cancelled after {:?}", self.resource, elapsed)
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::VecDeque;

    const INTERVAL: Duration = Duration::from_secs(15);

    enum Step {
        State(&'static str),
        NotFound,
        Transient,
        Fatal,
    }

    /// Fetch function replaying `steps`, repeating the last one forever
    fn scripted(
        steps: Vec<Step>,
        calls: &Cell<u32>,
    ) -> impl FnMut() -> std::future::Ready<Result<Observation<u32>, FetchError>> + '_ {
        let mut steps: VecDeque<Step> = steps.into();
        move || {
            let tick = calls.get();
            calls.set(tick + 1);
            let step = if steps.len() > 1 {
                steps.pop_front()
            } else {
                None
            };
            let result = match step.as_ref().or(steps.front()) {
                Some(Step::State(s)) => Ok(Observation::found(tick, *s)),
                Some(Step::NotFound) => Ok(Observation::NotFound),
                Some(Step::Transient) => Err(FetchError::transient("503 Service Unavailable")),
                Some(Step::Fatal) | None => Err(FetchError::fatal("403 Forbidden")),
            };
            std::future::ready(result)
        }
    }

    fn policy(
        pending: &[&str],
        target: &[&str],
        consecutive: u32,
    ) -> crate::convergence::policy::ConvergencePolicyBuilder {
        ConvergencePolicy::builder()
            .pending(pending.iter().copied())
            .target(target.iter().copied())
            .min_poll_interval(INTERVAL)
            .required_consecutive_targets(consecutive)
    }

    fn ctx() -> WaitContext {
        WaitContext::with_timeout(Duration::from_secs(30 * 60))
    }

    #[tokio::test(start_paused = true)]
    async fn detachment_needs_five_consecutive_targets() {
        let calls = Cell::new(0);
        let policy = policy(&["Attached"], &["Detached"], 5)
            .not_found_budget(40)
            .disappearance()
            .build()
            .unwrap();
        let steps = vec![
            Step::State("Attached"),
            Step::State("Attached"),
            Step::State("Detached"),
        ];

        let outcome = Poller::new("network profile", policy)
            .wait(&ctx(), scripted(steps, &calls))
            .await;

        // index 6 is the 7th read
        assert!(matches!(outcome, PollOutcome::Succeeded(Some(6))));
        assert_eq!(calls.get(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_on_first_success() {
        let calls = Cell::new(0);
        let policy = policy(&["Queued", "Started", "Running"], &["Succeeded"], 1)
            .build()
            .unwrap();
        let steps = vec![
            Step::State("Queued"),
            Step::State("Running"),
            Step::State("Succeeded"),
        ];

        let outcome = Poller::new("run", policy)
            .wait(&ctx(), scripted(steps, &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(Some(2))));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_status_fails_immediately() {
        let calls = Cell::new(0);
        let policy = policy(&["Queued", "Started", "Running"], &["Succeeded"], 1)
            .build()
            .unwrap();
        let steps = vec![Step::State("Queued"), Step::State("Failed")];

        let err = Poller::new("run ca1", policy)
            .wait_for(&ctx(), scripted(steps, &calls))
            .await
            .unwrap_err();

        assert_eq!(calls.get(), 2);
        assert_eq!(err.last_state(), Some("Failed"));
        assert!(matches!(
            err,
            WaitError::Failed {
                failure: Failure::UnexpectedState { ref state },
                ..
            } if state == "Failed"
        ));
        assert!(err.to_string().contains("run ca1"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_budgeted_ticks() {
        let calls = Cell::new(0);
        let policy = policy(&["Running"], &["Succeeded"], 1)
            .timeout(INTERVAL * 3)
            .build()
            .unwrap();
        let started = Instant::now();

        let outcome = Poller::new("run", policy)
            .wait(&ctx(), scripted(vec![Step::State("Running")], &calls))
            .await;

        match outcome {
            PollOutcome::TimedOut {
                elapsed,
                budget,
                last_state,
            } => {
                assert_eq!(budget, INTERVAL * 3);
                assert_eq!(elapsed, INTERVAL * 3);
                assert_eq!(last_state.as_deref(), Some("Running"));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(calls.get(), 3);
        assert_eq!(Instant::now() - started, INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn context_deadline_bounds_the_wait() {
        let calls = Cell::new(0);
        let policy = policy(&["Running"], &["Succeeded"], 1).build().unwrap();
        let ctx = WaitContext::with_timeout(INTERVAL * 2 + Duration::from_secs(1));

        let outcome = Poller::new("run", policy)
            .wait(&ctx, scripted(vec![Step::State("Running")], &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
        // reads at 0s, 15s, 30s; the deadline at 31s ends the wait
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_observation_resets_consecutive_count() {
        let calls = Cell::new(0);
        let policy = policy(&["Attached"], &["Detached"], 3).build().unwrap();
        let steps = vec![
            Step::State("Detached"),
            Step::State("Detached"),
            Step::State("Attached"),
            Step::State("Detached"),
            Step::State("Detached"),
            Step::State("Detached"),
        ];

        let outcome = Poller::new("profile", policy)
            .wait(&ctx(), scripted(steps, &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(Some(5))));
        assert_eq!(calls.get(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_pending() {
        let calls = Cell::new(0);
        let policy = policy(&["Attached"], &["Detached"], 2).build().unwrap();
        let steps = vec![
            Step::State("Detached"),
            Step::Transient,
            Step::State("Detached"),
            Step::State("Detached"),
        ];

        let outcome = Poller::new("profile", policy)
            .wait(&ctx(), scripted(steps, &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(Some(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_end_the_wait() {
        let calls = Cell::new(0);
        let policy = policy(&["Running"], &["Succeeded"], 1).build().unwrap();
        let steps = vec![Step::State("Running"), Step::Fatal];

        let outcome = Poller::new("run", policy)
            .wait(&ctx(), scripted(steps, &calls))
            .await;

        match outcome {
            PollOutcome::Failed {
                failure: Failure::Fetch(err),
                last_state,
            } => {
                assert!(!err.is_retryable());
                assert_eq!(last_state.as_deref(), Some("Running"));
            }
            other => panic!("expected fetch failure, got {:?}", other),
        }
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disappearance_succeeds_after_budget_is_exceeded() {
        let calls = Cell::new(0);
        let policy = policy(&["InProgress"], &["NotFound"], 1)
            .not_found_budget(4)
            .disappearance()
            .build()
            .unwrap();

        let outcome = Poller::new("replication", policy)
            .wait(&ctx(), scripted(vec![Step::NotFound], &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(None)));
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn found_response_resets_not_found_count() {
        let calls = Cell::new(0);
        let policy = policy(&["InProgress"], &["NotFound"], 1)
            .not_found_budget(2)
            .disappearance()
            .build()
            .unwrap();
        let steps = vec![
            Step::NotFound,
            Step::NotFound,
            Step::State("InProgress"),
            Step::NotFound,
        ];

        let outcome = Poller::new("replication", policy)
            .wait(&ctx(), scripted(steps, &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::Succeeded(None)));
        // 2 misses, 1 hit, then 3 misses to exceed the budget of 2
        assert_eq!(calls.get(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn state_change_fails_when_resource_vanishes() {
        let calls = Cell::new(0);
        let policy = policy(&["Updating"], &["Succeeded"], 1)
            .not_found_budget(1)
            .build()
            .unwrap();

        let err = Poller::new("subnet", policy)
            .wait_for(&ctx(), scripted(vec![Step::NotFound], &calls))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WaitError::Failed {
                failure: Failure::NotFound { attempts: 2 },
                ..
            }
        ));
        assert_eq!(err.last_state(), Some(NOT_FOUND_STATE));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let calls = Cell::new(0);
        let policy = policy(&["Running"], &["Succeeded"], 1).build().unwrap();
        let ctx = ctx();
        let token = ctx.token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(INTERVAL + INTERVAL / 2).await;
            token.cancel();
        });

        let outcome = Poller::new("run", policy)
            .wait(&ctx, scripted(vec![Step::State("Running")], &calls))
            .await;

        match outcome {
            PollOutcome::Cancelled { elapsed, .. } => {
                assert_eq!(elapsed, INTERVAL + INTERVAL / 2);
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_context_never_reads() {
        let calls = Cell::new(0);
        let policy = policy(&["Running"], &["Succeeded"], 1).build().unwrap();
        let ctx = ctx();
        ctx.cancel();

        let outcome = Poller::new("run", policy)
            .wait(&ctx, scripted(vec![Step::State("Running")], &calls))
            .await;

        assert!(matches!(outcome, PollOutcome::Cancelled { .. }));
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_read_cannot_outlive_deadline() {
        let policy = policy(&["Running"], &["Succeeded"], 1)
            .timeout(INTERVAL)
            .build()
            .unwrap();

        let outcome = Poller::new("run", policy)
            .wait(&ctx(), || {
                std::future::pending::<Result<Observation<()>, FetchError>>()
            })
            .await;

        assert!(matches!(
            outcome,
            PollOutcome::TimedOut { elapsed, .. } if elapsed == INTERVAL
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_count_respects_termination_bound() {
        for (timeout_secs, consecutive) in [(45, 1), (50, 3), (10, 2), (600, 5)] {
            let calls = Cell::new(0);
            let timeout = Duration::from_secs(timeout_secs);
            let policy = policy(&["Attached"], &["Detached"], consecutive)
                .timeout(timeout)
                .build()
                .unwrap();
            // flaps forever, never reaching the consecutive count past 1
            let steps = (0..1000)
                .map(|i| {
                    if i % 2 == 0 {
                        Step::State("Detached")
                    } else {
                        Step::State("Attached")
                    }
                })
                .collect();

            let outcome = Poller::new("profile", policy)
                .wait(&ctx(), scripted(steps, &calls))
                .await;

            let bound = timeout.as_secs().div_ceil(INTERVAL.as_secs()) as u32 + consecutive;
            assert!(calls.get() <= bound, "{} reads > bound {}", calls.get(), bound);
            if consecutive > 1 {
                assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn no_reads_after_success() {
        let calls = Cell::new(0);
        let policy = policy(&["Running"], &["Succeeded"], 1).build().unwrap();
        let poller = Poller::new("run", policy);

        let outcome = poller
            .wait(&ctx(), scripted(vec![Step::State("Succeeded")], &calls))
            .await;
        assert!(outcome.is_success());

        tokio::time::advance(INTERVAL * 10).await;
        assert_eq!(calls.get(), 1);
    }
}
