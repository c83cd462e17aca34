//! Cancellable deadline shared by a CRUD operation and the waits it performs

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline plus cancellation handle for one operation
///
/// Cloning shares the cancellation token; cancelling any clone cancels all.
#[derive(Debug, Clone)]
pub struct WaitContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl WaitContext {
    pub fn new(deadline: Instant, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Context whose deadline is `timeout` from now, with a fresh token
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout, CancellationToken::new())
    }

    /// Derive a context for a nested step
    ///
    /// The child gets the earlier of the two deadlines and is cancelled when
    /// the parent is, but cancelling the child leaves the parent alone.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = (Instant::now() + timeout).min(self.deadline);
        Self::new(deadline, self.cancel.child_token())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn child_never_outlives_parent() {
        let parent = WaitContext::with_timeout(Duration::from_secs(60));
        let child = parent.child_with_timeout(Duration::from_secs(600));
        assert_eq!(child.deadline(), parent.deadline());

        let short = parent.child_with_timeout(Duration::from_secs(5));
        assert!(short.deadline() < parent.deadline());
        assert_eq!(short.remaining(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_flows_downward_only() {
        let parent = WaitContext::with_timeout(Duration::from_secs(60));
        let child = parent.child_with_timeout(Duration::from_secs(10));

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child_with_timeout(Duration::from_secs(10));
        parent.cancel();
        assert!(other.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn expires_at_deadline() {
        let ctx = WaitContext::with_timeout(Duration::from_secs(3));
        assert!(!ctx.is_expired());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }
}
