pub mod billing;
pub mod config;
pub mod http;
pub mod leak;
pub mod metrics_server;
pub mod notifier;
pub mod observability;
pub mod store;
