// Service registry
//
// The single shared store of discovered backends. Written by the discovery
// feed and the health monitor, read (as owned snapshots) by selection and
// routing.

mod descriptor;
mod store;

pub use descriptor::{
    Capabilities, HealthState, HealthTransition, ServiceDescriptor, ServiceSummary,
};
pub use store::{ProbeApplied, ProbeOutcome, Registry, UpsertOutcome};
