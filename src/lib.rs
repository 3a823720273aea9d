// Saturn - zero-configuration discovery and routing for local text-generation backends
// Library exports

pub mod config;
pub mod daemon;
pub mod dialects;
pub mod discovery;
pub mod error;
pub mod health;
pub mod registry;
pub mod router;
pub mod selection;
pub mod server;

pub use error::{RouteError, RouteResult};
pub use registry::{Registry, ServiceDescriptor};
pub use router::{RequestRouter, RouteOutcome};
