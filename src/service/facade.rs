use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DocServiceError, IngestError, NativeError};
use crate::models::options::{RetryScope, ServiceOptions};
use crate::models::pool_config::PoolConfig;
use crate::models::server_config::{ServerConfig, TenantId};
use crate::native::{NativeConnector, NativeStatus, ReportSubmission};
use crate::pool::PooledConnection;
use crate::registry::{ConnectionRegistry, SetupReport};
use crate::service::operation::{AddReport, ListFolders, NativeCall};

/// 原生库启动文件名
pub const INIT_FILE_NAME: &str = "docservice.ini";

/// One document to ingest.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest<'a> {
    pub client_id: &'a str,
    pub folder: Option<&'a str>,
    pub content: &'a [u8],
    pub application_group: &'a str,
    pub application: &'a str,
    pub field_values: HashMap<String, String>,
    pub extra_values: HashMap<String, String>,
}

impl<'a> IngestRequest<'a> {
    pub fn new(client_id: &'a str, folder: Option<&'a str>, content: &'a [u8]) -> Self {
        Self {
            client_id,
            folder,
            content,
            ..Self::default()
        }
    }

    pub fn application(mut self, group: &'a str, application: &'a str) -> Self {
        self.application_group = group;
        self.application = application;
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.field_values.insert(key.into(), value.into());
        self
    }

    pub fn field_values(mut self, values: HashMap<String, String>) -> Self {
        self.field_values = values;
        self
    }

    pub fn extra_values(mut self, values: HashMap<String, String>) -> Self {
        self.extra_values = values;
        self
    }

    /// 合并索引字段，`extra_values` 覆盖同名字段
    pub fn merged_fields(&self) -> HashMap<String, String> {
        let mut merged = self.field_values.clone();
        merged.extend(
            self.extra_values
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        merged
    }
}

/// Result of an accepted ingest. `doc_id` may be empty: accepted, no id issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionOutcome {
    pub tenant: TenantId,
    pub folder: String,
    pub client_id: String,
    pub doc_id: String,
    pub ingested_at: DateTime<Utc>,
}

impl IngestionOutcome {
    pub fn has_doc_id(&self) -> bool {
        !self.doc_id.is_empty()
    }
}

enum CallFailure {
    Native(NativeError),
    TimedOut(Duration),
}

/// 文档服务门面
/// The operations surface application code calls: every call borrows a
/// connection for the tenant, runs one native operation and returns it.
pub struct DocumentService {
    registry: Arc<ConnectionRegistry>,
    connector: Arc<dyn NativeConnector>,
    options: ServiceOptions,
    pool_config: PoolConfig,
    init_dir: Mutex<Option<PathBuf>>,
}

impl DocumentService {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        connector: Arc<dyn NativeConnector>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            registry,
            connector,
            options,
            pool_config: PoolConfig::default(),
            init_dir: Mutex::new(None),
        }
    }

    pub fn pool_config(mut self, pool_config: PoolConfig) -> Self {
        self.pool_config = pool_config;
        self
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// 准备原生库需要的工作目录，重复调用返回同一路径
    pub async fn init(&self) -> Result<PathBuf, DocServiceError> {
        let mut recorded = self.init_dir.lock().await;
        if let Some(dir) = recorded.as_ref() {
            return Ok(dir.clone());
        }

        let dir = self
            .options
            .init_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| DocServiceError::InitializationFailed {
                path: dir.clone(),
                source,
            })?;

        let ini = dir.join(INIT_FILE_NAME);
        let content = format!(
            "[native]\ntrace_level={}\nmax_hits={}\n",
            self.options.trace_level, self.options.max_hits
        );
        tokio::fs::write(&ini, content)
            .await
            .map_err(|source| DocServiceError::InitializationFailed {
                path: ini.clone(),
                source,
            })?;

        info!("native layer initialized in {}", dir.display());
        *recorded = Some(dir.clone());
        Ok(dir)
    }

    pub async fn init_dir(&self) -> Option<PathBuf> {
        self.init_dir.lock().await.clone()
    }

    pub async fn setup_connections(
        &self,
        configs: &HashMap<TenantId, ServerConfig>,
    ) -> SetupReport {
        let report = self
            .registry
            .setup_connections(
                configs,
                &self.pool_config,
                &self.options,
                self.connector.clone(),
            )
            .await;
        info!(
            "setup finished: registered={}, failed={}",
            report.registered.len(),
            report.failed.len()
        );
        report
    }

    /// 列出租户下所有文件夹，顺序与原生枚举一致
    pub async fn list_folders(&self, tenant: &str) -> Result<Vec<String>, DocServiceError> {
        self.run(tenant, &ListFolders).await
    }

    pub async fn ingest_document(
        &self,
        tenant: &str,
        request: &IngestRequest<'_>,
    ) -> Result<IngestionOutcome, DocServiceError> {
        // 未知租户优先报告，且不借出连接
        self.registry.lookup(tenant)?;
        let folder = match request.folder.map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => return Err(DocServiceError::failed(tenant, IngestError::MissingFolder)),
        };

        let fields = request.merged_fields();
        let call = AddReport {
            folder,
            submission: ReportSubmission {
                client_id: request.client_id,
                content: request.content,
                application_group: request.application_group,
                application: request.application,
                fields: &fields,
            },
        };
        let status = self.run(tenant, &call).await?;
        debug!(
            "ingest status: tenant={}, client={}, folder={}, status={:?}",
            tenant, request.client_id, folder, status
        );

        match status {
            NativeStatus {
                code: Some(NativeStatus::OK),
                doc_id,
                ..
            } => Ok(IngestionOutcome {
                tenant: tenant.to_string(),
                folder: folder.to_string(),
                client_id: request.client_id.to_string(),
                doc_id: doc_id.unwrap_or_default(),
                ingested_at: Utc::now(),
            }),
            NativeStatus {
                code: Some(code),
                message,
                ..
            } => Err(DocServiceError::failed(
                tenant,
                IngestError::Rejected {
                    folder: folder.to_string(),
                    code,
                    message: message.unwrap_or_default(),
                },
            )),
            NativeStatus { code: None, .. } => Err(DocServiceError::failed(
                tenant,
                IngestError::StatusUnavailable {
                    folder: folder.to_string(),
                },
            )),
        }
    }

    /// 归还连接，按策略关闭文件夹；不会向调用方抛错
    pub async fn release_resources(&self, conn: PooledConnection) {
        debug!(
            "release: tenant={}, handle={:?}, folder={:?}, in_use_ms={}",
            conn.tenant(),
            conn.handle_id(),
            conn.open_folder_name(),
            conn.time_in_use().as_millis()
        );
        conn.release().await;
    }

    pub async fn close_tenant(&self, tenant: &str) {
        if !self.registry.close_tenant(tenant).await {
            warn!("close_tenant: '{}' was not registered", tenant);
        }
    }

    async fn run<C: NativeCall>(&self, tenant: &str, call: &C) -> Result<C::Output, DocServiceError> {
        let pool = self.registry.lookup(tenant)?;
        let attempts = match self.options.retry.scope {
            RetryScope::Operation => self.options.retry.logon_retries + 1,
            RetryScope::Borrow => 1,
        };

        let mut attempt = 1;
        loop {
            let mut conn = pool.borrow().await?;
            let start = Instant::now();
            conn.enter_call();
            let result = match self.options.call_timeout {
                Some(limit) => match tokio::time::timeout(limit, call.call(&mut conn)).await {
                    Ok(r) => r.map_err(CallFailure::Native),
                    Err(_) => Err(CallFailure::TimedOut(limit)),
                },
                None => call.call(&mut conn).await.map_err(CallFailure::Native),
            };
            conn.exit_call();
            debug!(
                "{}: tenant={}, attempt={}, elapsed_ms={}, ok={}",
                call.name(),
                tenant,
                attempt,
                start.elapsed().as_millis(),
                result.is_ok()
            );

            match result {
                Ok(output) => {
                    self.release_resources(conn).await;
                    return Ok(output);
                }
                Err(CallFailure::TimedOut(after)) => {
                    conn.invalidate();
                    self.release_resources(conn).await;
                    return Err(DocServiceError::OperationTimedOut {
                        tenant: tenant.to_string(),
                        operation: call.name(),
                        after,
                    });
                }
                Err(CallFailure::Native(e)) => {
                    let session_lost = e.is_session_lost();
                    if session_lost {
                        conn.invalidate();
                    }
                    self.release_resources(conn).await;
                    if session_lost && attempt < attempts {
                        warn!(
                            "{} on '{}' lost its session (attempt {}/{}), retrying: {}",
                            call.name(),
                            tenant,
                            attempt,
                            attempts,
                            e
                        );
                        attempt += 1;
                        continue;
                    }
                    return Err(DocServiceError::OperationFailed {
                        tenant: tenant.to_string(),
                        cause: call.failure(e),
                    });
                }
            }
        }
    }
}
