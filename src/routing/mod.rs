//! Provider selection
//!
//! - [`ModelRegistry`]: the provider catalog (capability, quota, cost, timeout)
//! - [`RoutingTable`]: task type -> primary provider + ordered fallbacks
//! - [`AvailabilityChecker`]: daily quota admission against the usage store
//! - [`ModelSelector`]: walks a route and returns the first admissible provider

mod availability;
mod registry;
mod selector;

pub use availability::AvailabilityChecker;
pub use registry::{Capability, ModelRegistry, ProviderConfig, RoutingTable, TaskRoute};
pub use selector::{ModelSelector, Priority};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("No route configured for task type '{0}'")]
    NoRouteFound(String),

    #[error("All providers exhausted for task type '{0}'")]
    AllProvidersExhausted(String),
}
