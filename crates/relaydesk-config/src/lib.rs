pub mod app;
pub mod gateway;
pub mod loader;

pub use app::{
    AppConfig, LogFormat, LoggingConfig, RateLimitConfig, SessionConfig, StorageConfig,
};
pub use gateway::{join_url, validate_base_url, EndpointPaths, GatewayConfig};
pub use loader::ConfigLoader;
