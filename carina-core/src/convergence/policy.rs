//! Declarative description of when an asynchronous remote operation is done

use std::collections::BTreeSet;
use std::time::Duration;

use thiserror::Error;

/// Default minimum interval between two reads
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Errors raised while building a [`ConvergencePolicy`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("states {0:?} are both pending and target")]
    OverlappingStates(Vec<String>),

    #[error("at least one target state is required")]
    NoTargetStates,

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("required consecutive target observations must be at least 1")]
    ZeroConsecutiveTargets,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,
}

/// What the caller is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Purpose {
    /// The resource is expected to exist throughout; running out of the
    /// not-found budget is a failure.
    #[default]
    StateChange,
    /// The resource is expected to go away; running out of the not-found
    /// budget confirms it is gone.
    Disappearance,
}

/// Pending and target states plus the pacing of the wait
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergencePolicy {
    pending: BTreeSet<String>,
    target: BTreeSet<String>,
    min_poll_interval: Duration,
    required_consecutive_targets: u32,
    timeout: Option<Duration>,
    not_found_budget: u32,
    purpose: Purpose,
}

impl ConvergencePolicy {
    pub fn builder() -> ConvergencePolicyBuilder {
        ConvergencePolicyBuilder::default()
    }

    pub fn is_pending(&self, state: &str) -> bool {
        self.pending.contains(state)
    }

    pub fn is_target(&self, state: &str) -> bool {
        self.target.contains(state)
    }

    pub fn pending_states(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn target_states(&self) -> impl Iterator<Item = &str> {
        self.target.iter().map(String::as_str)
    }

    pub fn min_poll_interval(&self) -> Duration {
        self.min_poll_interval
    }

    pub fn required_consecutive_targets(&self) -> u32 {
        self.required_consecutive_targets
    }

    /// Own budget of this wait; `None` means the caller's deadline is the budget
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn not_found_budget(&self) -> u32 {
        self.not_found_budget
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }
}

/// Builder for [`ConvergencePolicy`]; validation happens in [`build`](Self::build)
#[derive(Debug, Clone)]
pub struct ConvergencePolicyBuilder {
    pending: BTreeSet<String>,
    target: BTreeSet<String>,
    min_poll_interval: Duration,
    required_consecutive_targets: u32,
    timeout: Option<Duration>,
    not_found_budget: u32,
    purpose: Purpose,
}

impl Default for ConvergencePolicyBuilder {
    fn default() -> Self {
        Self {
            pending: BTreeSet::new(),
            target: BTreeSet::new(),
            min_poll_interval: DEFAULT_POLL_INTERVAL,
            required_consecutive_targets: 1,
            timeout: None,
            not_found_budget: 0,
            purpose: Purpose::StateChange,
        }
    }
}

impl ConvergencePolicyBuilder {
    pub fn pending<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.extend(states.into_iter().map(Into::into));
        self
    }

    pub fn target<I, S>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target.extend(states.into_iter().map(Into::into));
        self
    }

    pub fn min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    pub fn required_consecutive_targets(mut self, count: u32) -> Self {
        self.required_consecutive_targets = count;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn not_found_budget(mut self, budget: u32) -> Self {
        self.not_found_budget = budget;
        self
    }

    pub fn purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = purpose;
        self
    }

    /// Shorthand for `purpose(Purpose::Disappearance)`
    pub fn disappearance(self) -> Self {
        self.purpose(Purpose::Disappearance)
    }

    pub fn build(self) -> Result<ConvergencePolicy, PolicyError> {
        let overlap: Vec<String> = self.pending.intersection(&self.target).cloned().collect();
        if !overlap.is_empty() {
            return Err(PolicyError::OverlappingStates(overlap));
        }
        if self.target.is_empty() {
            return Err(PolicyError::NoTargetStates);
        }
        if self.min_poll_interval.is_zero() {
            return Err(PolicyError::ZeroPollInterval);
        }
        if self.required_consecutive_targets == 0 {
            return Err(PolicyError::ZeroConsecutiveTargets);
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(PolicyError::ZeroTimeout);
        }

        Ok(ConvergencePolicy {
            pending: self.pending,
            target: self.target,
            min_poll_interval: self.min_poll_interval,
            required_consecutive_targets: self.required_consecutive_targets,
            timeout: self.timeout,
            not_found_budget: self.not_found_budget,
            purpose: self.purpose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        let policy = ConvergencePolicy::builder()
            .pending(["Running"])
            .target(["Succeeded"])
            .build()
            .unwrap();

        assert!(policy.is_pending("Running"));
        assert!(policy.is_target("Succeeded"));
        assert!(!policy.is_target("Failed"));
        assert_eq!(policy.min_poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(policy.required_consecutive_targets(), 1);
        assert_eq!(policy.timeout(), None);
        assert_eq!(policy.purpose(), Purpose::StateChange);
    }

    #[test]
    fn rejects_overlapping_states() {
        let err = ConvergencePolicy::builder()
            .pending(["Attached", "Detached"])
            .target(["Detached"])
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::OverlappingStates(vec!["Detached".into()]));
    }

    #[test]
    fn rejects_invalid_pacing() {
        let base = ConvergencePolicy::builder().target(["Succeeded"]);

        assert_eq!(
            base.clone().min_poll_interval(Duration::ZERO).build(),
            Err(PolicyError::ZeroPollInterval)
        );
        assert_eq!(
            base.clone().required_consecutive_targets(0).build(),
            Err(PolicyError::ZeroConsecutiveTargets)
        );
        assert_eq!(
            base.timeout(Duration::ZERO).build(),
            Err(PolicyError::ZeroTimeout)
        );
    }

    #[test]
    fn rejects_missing_target() {
        let err = ConvergencePolicy::builder()
            .pending(["Queued"])
            .build()
            .unwrap_err();
        assert_eq!(err, PolicyError::NoTargetStates);
    }

    #[test]
    fn disappearance_shorthand() {
        let policy = ConvergencePolicy::builder()
            .pending(["InProgress"])
            .target(["NotFound"])
            .not_found_budget(4)
            .disappearance()
            .build()
            .unwrap();
        assert_eq!(policy.purpose(), Purpose::Disappearance);
        assert_eq!(policy.not_found_budget(), 4);
    }
}
