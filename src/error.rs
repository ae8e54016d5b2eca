use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 底层文档服务客户端抛出的错误
/// Errors raised by a native document-service client.
#[derive(Error, Debug)]
pub enum NativeError {
    #[error("Logon failed: {0}")]
    Logon(String),
    #[error("Session lost: {0}")]
    SessionLost(String),
    #[error("Folder error: {0}")]
    Folder(String),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Native error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl NativeError {
    /// 会话已不可用，连接必须作废
    pub fn is_session_lost(&self) -> bool {
        matches!(self, NativeError::SessionLost(_))
    }
}

/// Errors produced by a single tenant's connection pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Pool '{tenant}' exhausted after waiting {waited:?}")]
    Exhausted { tenant: String, waited: Duration },
    #[error("Pool '{0}' is closed")]
    Closed(String),
    #[error("Logon to '{tenant}' failed after {attempts} attempt(s): {source}")]
    Logon {
        tenant: String,
        attempts: u32,
        #[source]
        source: NativeError,
    },
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
    /// 归还时的清理失败，只记录日志，不会传给调用方
    #[error("Cleanup failed on '{tenant}': {source}")]
    Cleanup {
        tenant: String,
        #[source]
        source: NativeError,
    },
}

impl PoolError {
    pub fn tenant(&self) -> Option<&str> {
        match self {
            PoolError::Exhausted { tenant, .. }
            | PoolError::Logon { tenant, .. }
            | PoolError::Cleanup { tenant, .. } => Some(tenant),
            PoolError::Closed(tenant) => Some(tenant),
            PoolError::InvalidConfig(_) => None,
        }
    }
}

/// Errors while reading options or server definitions.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for '{key}'")]
    InvalidValue { key: String, value: String },
    #[error("Duplicate server definition: {0}")]
    DuplicateServer(String),
    #[error("Malformed server definition: {0}")]
    Malformed(String),
}

/// 调用方可见的错误类别
/// Stable failure categories for callers that map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Initialization,
    UnknownTenant,
    PoolExhausted,
    TimedOut,
    OperationFailed,
    Config,
}

/// The single failure type returned by every facade operation.
#[derive(Error, Debug)]
pub enum DocServiceError {
    #[error("Initialization failed for '{}': {source}", path.display())]
    InitializationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("No connection available for '{tenant}' within {waited:?}")]
    PoolExhausted { tenant: String, waited: Duration },
    #[error("{operation} on '{tenant}' timed out after {after:?}")]
    OperationTimedOut {
        tenant: String,
        operation: &'static str,
        after: Duration,
    },
    #[error("Operation on '{tenant}' failed with exception: {cause}")]
    OperationFailed {
        tenant: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DocServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DocServiceError::InitializationFailed { .. } => ErrorKind::Initialization,
            DocServiceError::UnknownTenant(_) => ErrorKind::UnknownTenant,
            DocServiceError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            DocServiceError::OperationTimedOut { .. } => ErrorKind::TimedOut,
            DocServiceError::OperationFailed { .. } => ErrorKind::OperationFailed,
            DocServiceError::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn failed(
        tenant: &str,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        DocServiceError::OperationFailed {
            tenant: tenant.to_string(),
            cause: cause.into(),
        }
    }
}

impl From<PoolError> for DocServiceError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Exhausted { tenant, waited } => {
                DocServiceError::PoolExhausted { tenant, waited }
            }
            PoolError::InvalidConfig(msg) => DocServiceError::Config(ConfigError::Malformed(msg)),
            other => {
                let tenant = other.tenant().unwrap_or_default().to_string();
                DocServiceError::OperationFailed {
                    tenant,
                    cause: Box::new(other),
                }
            }
        }
    }
}

/// 与文件夹相关的失败原因，作为 `OperationFailed` 的 cause
/// Causes attached to `OperationFailed` for ingest calls.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Folder name is required (status: missing argument)")]
    MissingFolder,
    #[error("Ingest into folder '{folder}' rejected, Status {code}: {message}")]
    Rejected {
        folder: String,
        code: i32,
        message: String,
    },
    #[error("Ingest into folder '{folder}' failed, no doc id returned (Status unavailable)")]
    StatusUnavailable { folder: String },
    #[error("Ingest into folder '{folder}' failed: {source}")]
    Native {
        folder: String,
        #[source]
        source: NativeError,
    },
}
