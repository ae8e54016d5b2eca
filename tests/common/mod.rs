#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use docpool::native::memory::{CallStats, MemoryConnector};
use docpool::{
    ConnectionPool, ConnectionRegistry, DocumentService, PoolConfig, ServerConfig, ServiceOptions,
    TenantId,
};

pub fn connector(tenants: &[(&str, &[&str])]) -> Arc<MemoryConnector> {
    let connector = Arc::new(MemoryConnector::new());
    for (tenant, folders) in tenants {
        connector.add_tenant(tenant, folders.iter().copied());
    }
    connector
}

pub fn servers(names: &[&str]) -> HashMap<TenantId, ServerConfig> {
    names
        .iter()
        .map(|name| {
            (
                name.to_string(),
                ServerConfig::new(format!("{}.cmod.local", name), "svc").password("secret"),
            )
        })
        .collect()
}

pub async fn service(
    connector: Arc<MemoryConnector>,
    options: ServiceOptions,
    pool_config: PoolConfig,
    tenants: &[&str],
) -> DocumentService {
    let service = DocumentService::new(Arc::new(ConnectionRegistry::new()), connector, options)
        .pool_config(pool_config);
    let report = service.setup_connections(&servers(tenants)).await;
    assert!(report.is_complete(), "setup failed: {:?}", report.failed);
    service
}

pub fn count(counter: &AtomicU64) -> u64 {
    CallStats::get(counter)
}

/// Waits for handles returned from `Drop` on a spawned task.
pub async fn settle(pool: &ConnectionPool) {
    for _ in 0..100 {
        if pool.status().checked_out == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("handles still checked out: {:?}", pool.status());
}

pub fn temp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("docpool-{}-{}", std::process::id(), name))
}
