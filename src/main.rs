use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use docpool::config_loader;
use docpool::native::memory::MemoryConnector;
use docpool::{ConnectionRegistry, DocumentService, IngestRequest, ServerConfig, ServiceOptions};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 参数为 XML 文件或目录时从中读取租户，否则使用演示租户
    let servers = match std::env::args().nth(1) {
        Some(arg) => {
            let path = Path::new(&arg);
            if path.is_dir() {
                config_loader::load_from_path(path)?
            } else {
                config_loader::load_file(path)?
            }
        }
        None => HashMap::from([(
            "main".to_string(),
            ServerConfig::new("localhost", "demo").description("in-memory demo"),
        )]),
    };

    let connector = Arc::new(MemoryConnector::new());
    for tenant in servers.keys() {
        connector.add_tenant(tenant, ["Statements", "Reports"]);
    }

    let service = DocumentService::new(
        Arc::new(ConnectionRegistry::new()),
        connector,
        ServiceOptions::new(),
    );
    let dir = service.init().await?;
    info!("init dir: {}", dir.display());

    let report = service.setup_connections(&servers).await;
    for (tenant, err) in &report.failed {
        info!("skipping {}: {}", tenant, err);
    }

    for tenant in &report.registered {
        let folders = service.list_folders(tenant).await?;
        info!("{} folders: {:?}", tenant, folders);

        let request = IngestRequest::new("client-001", Some("Statements"), b"%PDF-1.4 demo")
            .application("STMT", "MONTHLY")
            .field("account", "0001");
        let outcome = service
            .ingest_document(tenant, &request)
            .await
            .with_context(|| format!("ingest into {}", tenant))?;
        info!("{} ingested: doc_id={:?}", tenant, outcome.doc_id);

        if let Ok(pool) = service.registry().lookup(tenant) {
            info!("{:?}", pool.status());
        }
        service.close_tenant(tenant).await;
    }
    Ok(())
}
