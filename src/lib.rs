pub mod balancer;
pub mod config;
pub mod dispatch;
pub mod mapping;
pub mod metrics;
pub mod registry;
pub mod rules;
pub mod template;

pub use config::GatewayConfig;
pub use dispatch::{Dispatcher, ResolvedRoute, RouteError};
