use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::models::{parse_flag, parse_prop};

pub const DEFAULT_MAX_HITS: i32 = 100;
pub const DEFAULT_TRACE_LEVEL: u8 = 2;

/// 登录失败重试的作用范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScope {
    /// Only logons made while borrowing are retried.
    Borrow,
    /// Additionally rerun a native call whose session was lost, on a freshly logged-on handle.
    Operation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub logon_retries: u32,
    pub scope: RetryScope,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            logon_retries: 0,
            scope: RetryScope::Borrow,
        }
    }

    pub fn retries(logon_retries: u32, scope: RetryScope) -> Self {
        Self {
            logon_retries,
            scope,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::retries(1, RetryScope::Borrow)
    }
}

/// 门面级参数
/// Facade-wide options shared by every tenant pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOptions {
    pub max_hits: i32,                   // 原生查询结果上限
    pub trace_level: u8,                 // 原生诊断日志级别
    pub retry: RetryPolicy,
    pub close_folder_on_return: bool,    // 归还连接时关闭已打开的文件夹
    pub init_dir: Option<PathBuf>,       // 原生库初始化目录，缺省使用系统临时目录
    pub call_timeout: Option<Duration>,  // 单次原生调用超时
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_hits: DEFAULT_MAX_HITS,
            trace_level: DEFAULT_TRACE_LEVEL,
            retry: RetryPolicy::default(),
            close_folder_on_return: false,
            init_dir: None,
            call_timeout: None,
        }
    }
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_hits(mut self, max_hits: i32) -> Self {
        self.max_hits = max_hits;
        self
    }

    pub fn trace_level(mut self, trace_level: u8) -> Self {
        self.trace_level = trace_level;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn close_folder_on_return(mut self, close: bool) -> Self {
        self.close_folder_on_return = close;
        self
    }

    pub fn init_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.init_dir = Some(dir.into());
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Builds options from the legacy flat property keys.
    ///
    /// `odNative_LogonAndRetryOnException=true` means one logon retry unless
    /// `odNative_logonRetries` gives an explicit bound.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut opts = Self::default();
        if let Some(v) = parse_prop(props, "od.maxHits")? {
            opts.max_hits = v;
        }
        if let Some(v) = parse_prop(props, "logwk.traceLevel")? {
            opts.trace_level = v;
        }
        if let Some(retry) = parse_flag(props, "odNative_LogonAndRetryOnException")? {
            opts.retry.logon_retries = u32::from(retry);
        }
        if let Some(n) = parse_prop(props, "odNative_logonRetries")? {
            opts.retry.logon_retries = n;
        }
        if let Some(scope) = props.get("odNative_retryScope") {
            opts.retry.scope = match scope.trim().to_ascii_lowercase().as_str() {
                "borrow" => RetryScope::Borrow,
                "operation" => RetryScope::Operation,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "odNative_retryScope".into(),
                        value: scope.clone(),
                    });
                }
            };
        }
        if let Some(v) = parse_flag(props, "odNative_closeFolderOnReturnToPool")? {
            opts.close_folder_on_return = v;
        }
        if let Some(dir) = props.get("odNative_initDir").filter(|d| !d.trim().is_empty()) {
            opts.init_dir = Some(PathBuf::from(dir.trim()));
        }
        if let Some(ms) = parse_prop::<u64>(props, "odNative_callTimeoutMs")? {
            opts.call_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(opts)
    }
}
