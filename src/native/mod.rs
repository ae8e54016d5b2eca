//! 原生文档服务客户端接口
//!
//! The document service is reached through a client library that this crate does
//! not own. Anything implementing these traits can be pooled: a binding to the
//! vendor library in production, [`memory::MemoryConnector`] in tests and demos.

#[cfg(feature = "memory")]
pub mod memory;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::NativeError;
use crate::models::server_config::ServerConfig;

/// Parameters handed to the native library on every logon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub max_hits: i32,
    pub trace_level: u8,
}

/// 创建原生会话的工厂
#[async_trait]
pub trait NativeConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn logon(
        &self,
        tenant: &str,
        server: &ServerConfig,
        session: &SessionOptions,
    ) -> Result<Box<dyn NativeConnection>, NativeError>;
}

/// An opened session on the document service.
#[async_trait]
pub trait NativeConnection: Send {
    async fn folder_count(&mut self) -> Result<usize, NativeError>;

    async fn folder_names(&mut self) -> Result<FolderNames, NativeError>;

    async fn open_folder(&mut self, name: &str) -> Result<Box<dyn NativeFolder>, NativeError>;

    async fn is_alive(&mut self) -> bool;

    async fn logoff(&mut self) -> Result<(), NativeError>;
}

/// 在某个连接上打开的文件夹
#[async_trait]
pub trait NativeFolder: Send {
    fn name(&self) -> &str;

    async fn add_report(
        &mut self,
        report: &ReportSubmission<'_>,
    ) -> Result<NativeStatus, NativeError>;

    async fn close(&mut self) -> Result<(), NativeError>;
}

/// One document plus its index values, as passed to `add_report`.
#[derive(Debug, Clone, Copy)]
pub struct ReportSubmission<'a> {
    pub client_id: &'a str,
    pub content: &'a [u8],
    pub application_group: &'a str,
    pub application: &'a str,
    pub fields: &'a HashMap<String, String>,
}

/// Status reported by the native layer after `add_report` returned.
///
/// `code == None` means the library gave no status at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeStatus {
    pub code: Option<i32>,
    pub message: Option<String>,
    pub doc_id: Option<String>,
}

impl NativeStatus {
    pub const OK: i32 = 0;

    pub fn ok(doc_id: Option<String>) -> Self {
        Self {
            code: Some(Self::OK),
            message: None,
            doc_id,
        }
    }

    pub fn rejected(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: Some(message.into()),
            doc_id: None,
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// 文件夹名称序列：惰性、有限、只能遍历一次
/// Lazy, finite, single-pass enumeration of folder names.
pub struct FolderNames {
    inner: Box<dyn Iterator<Item = String> + Send>,
}

impl FolderNames {
    pub fn new<I>(names: I) -> Self
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        Self {
            inner: Box::new(names.into_iter()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl Iterator for FolderNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.inner.next()
    }
}

impl fmt::Debug for FolderNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FolderNames").finish_non_exhaustive()
    }
}
