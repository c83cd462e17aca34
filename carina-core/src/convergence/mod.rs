//! Convergence - wait for asynchronous remote operations to settle
//!
//! Cloud control planes acknowledge many requests before the work is done.
//! A [`Poller`] bridges that gap: it re-reads the resource on a fixed
//! interval and classifies each read against a [`ConvergencePolicy`] until
//! the target state has been seen often enough, something fails, or the
//! [`WaitContext`] runs out.
//!
//! The fetch function is supplied by the caller, so the poller itself has
//! no knowledge of any remote client.

mod context;
mod error;
mod poller;
mod policy;

pub use context::WaitContext;
pub use error::{Failure, FetchError, WaitError};
pub use poller::{NOT_FOUND_STATE, Observation, PollOutcome, Poller};
pub use policy::{
    ConvergencePolicy, ConvergencePolicyBuilder, DEFAULT_POLL_INTERVAL, PolicyError, Purpose,
};
