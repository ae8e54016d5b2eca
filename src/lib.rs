pub mod config_loader;
pub mod error;
pub mod models;
pub mod native;
pub mod pool;
pub mod registry;
pub mod service;

pub use error::{DocServiceError, ErrorKind};
pub use models::options::{RetryPolicy, RetryScope, ServiceOptions};
pub use models::pool_config::PoolConfig;
pub use models::server_config::{ServerConfig, TenantId};
pub use pool::{ConnectionPool, PoolStatus, PooledConnection};
pub use registry::{ConnectionRegistry, SetupReport};
pub use service::{DocumentService, IngestRequest, IngestionOutcome};
