//! Carina Core
//!
//! Core library shared by Carina providers: resource and state values,
//! the provider trait, diffing, and waiting on asynchronous remote operations

pub mod convergence;
pub mod differ;
pub mod provider;
pub mod resource;
