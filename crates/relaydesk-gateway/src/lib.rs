pub mod client;
pub mod endpoints;
pub mod monitor;
pub mod service;
pub mod types;
pub mod validate;

pub use client::GatewayClient;
pub use endpoints::{EndpointSource, Endpoints};
pub use monitor::InstanceMonitor;
pub use service::{AuthService, LoginOutcome};
pub use types::{AuthResponse, ConnectionStatus, InstanceAction, InstanceResponse};
