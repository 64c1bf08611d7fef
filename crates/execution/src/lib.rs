//! Execution layer - resource dependency resolution and provider startup.

#![warn(missing_docs)]

pub mod config;
pub mod dependency;
pub mod provider;
pub mod scheduler;

pub use config::StartupConfig;
pub use dependency::{
    DependencyResolver, ResolutionReport, ResolveError, ResolvedOrder, ResolvedResource,
    ResourceDescriptor, ResourceLookup, WorkUnit,
};
pub use provider::{
    CompletionToken, LoggingInvoker, Provider, ProviderRegistration, StartupContext, WorkInvoker,
};
pub use scheduler::{BoxError, StartupError, StartupReport, StartupScheduler};
