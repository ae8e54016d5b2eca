use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{error, info, warn};

use crate::error::{DocServiceError, PoolError};
use crate::models::options::ServiceOptions;
use crate::models::pool_config::PoolConfig;
use crate::models::server_config::{ServerConfig, TenantId};
use crate::native::NativeConnector;
use crate::pool::ConnectionPool;

/// Outcome of one `setup_connections` pass.
#[derive(Debug, Default)]
pub struct SetupReport {
    pub registered: Vec<TenantId>,
    pub failed: Vec<(TenantId, PoolError)>,
}

impl SetupReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// 租户连接池注册表
/// Maps tenant ids to their connection pools. Shared through an `Arc`.
#[derive(Default)]
pub struct ConnectionRegistry {
    pools: DashMap<TenantId, Arc<ConnectionPool>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            pools: DashMap::new(),
        }
    }

    /// 为每个服务端配置创建连接池；单个租户失败不影响其余租户
    pub async fn setup_connections(
        &self,
        configs: &HashMap<TenantId, ServerConfig>,
        pool_config: &PoolConfig,
        options: &ServiceOptions,
        connector: Arc<dyn NativeConnector>,
    ) -> SetupReport {
        let mut report = SetupReport::default();
        let mut tenants: Vec<&TenantId> = configs.keys().collect();
        tenants.sort();

        for tenant in tenants {
            let server = &configs[tenant];
            let created = ConnectionPool::connect(
                tenant.clone(),
                server.clone(),
                pool_config.clone(),
                options,
                connector.clone(),
            )
            .await;
            match created {
                Ok(pool) => {
                    self.replace(tenant, pool).await;
                    info!(
                        "registered pool: tenant={}, endpoint={}, connector={}",
                        tenant,
                        server.endpoint(),
                        connector.name()
                    );
                    report.registered.push(tenant.clone());
                }
                Err(e) => {
                    error!("failed to set up pool for '{}': {}", tenant, e);
                    report.failed.push((tenant.clone(), e));
                }
            }
        }
        report
    }

    /// Inserts an already built pool, closing any pool it replaces.
    pub async fn register(&self, pool: ConnectionPool) {
        let tenant = pool.tenant().to_string();
        self.replace(&tenant, pool).await;
    }

    async fn replace(&self, tenant: &str, pool: ConnectionPool) {
        let previous = self.pools.insert(tenant.to_string(), Arc::new(pool));
        if let Some(old) = previous {
            if let Err(e) = old.close().await {
                warn!("closing replaced pool for '{}' failed: {}", tenant, e);
            }
        }
    }

    pub fn lookup(&self, tenant: &str) -> Result<Arc<ConnectionPool>, DocServiceError> {
        self.pools
            .get(tenant)
            .map(|v| v.value().clone())
            .ok_or_else(|| DocServiceError::UnknownTenant(tenant.to_string()))
    }

    pub fn contains(&self, tenant: &str) -> bool {
        self.pools.contains_key(tenant)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        let mut names: Vec<TenantId> = self.pools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// 关闭并移除租户连接池，失败只记录日志
    pub async fn close_tenant(&self, tenant: &str) -> bool {
        let Some((_, pool)) = self.pools.remove(tenant) else {
            warn!("close requested for unknown tenant '{}'", tenant);
            return false;
        };
        match pool.close().await {
            Ok(()) => info!("closed pool for '{}'", tenant),
            Err(e) => warn!("closing pool for '{}' failed: {}", tenant, e),
        }
        true
    }
}
