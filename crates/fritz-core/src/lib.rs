pub mod collector;
pub mod config;
pub mod exposition;
pub mod home;
pub mod loader;
pub mod sample;
pub mod spec;
pub mod upnp;

#[cfg(test)]
mod collector_tests;

pub use collector::{coerce, CollectError, GatewayCollector, COLLECT_ERRORS_METRIC};
pub use config::{CollectorConfig, HomeSource, DEFAULT_UPNP_PORT};
pub use home::{AuthError, HomeCollector, HomeData, HomeError, ParseError, Session};
pub use loader::{load_until_published, spawn_directory_loader, DirectoryCell};
pub use sample::{MetricDesc, MetricKind, MetricSample};
pub use spec::{default_specs, load_specs, MetricSpec, SpecError};
pub use upnp::{
    Action, ActionInvoker, ActionResult, DirectoryLoader, Service, ServiceDirectory, UpnpClient,
    UpnpError, Value,
};
