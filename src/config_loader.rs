//! 从 XML 读取租户服务端配置
//!
//! ```xml
//! <servers>
//!     <server name="portalA" host="cmod-a.local" port="1445" user="svc" password="secret"/>
//! </servers>
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use quick_xml::de;
use serde::Deserialize;
use walkdir::WalkDir;

use crate::error::ConfigError;
use crate::models::server_config::{DEFAULT_PORT, ServerConfig, TenantId};

#[derive(Debug, Deserialize)]
struct Servers {
    #[serde(rename = "server", default)]
    servers: Vec<ServerNode>,
}

#[derive(Debug, Deserialize)]
struct ServerNode {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@host")]
    host: String,
    #[serde(rename = "@port")]
    port: Option<u16>,
    #[serde(rename = "@user")]
    user: String,
    #[serde(rename = "@password")]
    password: Option<String>,
    #[serde(rename = "@description")]
    description: Option<String>,
}

impl TryFrom<ServerNode> for ServerConfig {
    type Error = ConfigError;

    fn try_from(node: ServerNode) -> std::result::Result<Self, Self::Error> {
        if node.name.trim().is_empty() {
            return Err(ConfigError::Malformed("server without a name".into()));
        }
        if node.host.trim().is_empty() {
            return Err(ConfigError::Malformed(format!(
                "server '{}' has no host",
                node.name
            )));
        }
        Ok(ServerConfig {
            host: node.host.trim().to_string(),
            port: node.port.unwrap_or(DEFAULT_PORT),
            user: node.user,
            password: node.password.unwrap_or_default(),
            description: node.description,
        })
    }
}

/// 从内存中的 XML 内容读取
pub fn load(assets: &[&[u8]]) -> Result<HashMap<TenantId, ServerConfig>> {
    let mut out = HashMap::new();
    for data in assets {
        let content = std::str::from_utf8(data).context("Asset content is not valid UTF-8")?;
        process_server_data(content, "memory", &mut out)?;
    }
    Ok(out)
}

pub fn load_file(path: &Path) -> Result<HashMap<TenantId, ServerConfig>> {
    let mut out = HashMap::new();
    process_server_file(path, &mut out)?;
    Ok(out)
}

/// 递归读取目录下所有 XML 文件；同名租户视为错误
pub fn load_from_path(dir_path: &Path) -> Result<HashMap<TenantId, ServerConfig>> {
    let mut out = HashMap::new();
    let mut files: Vec<_> = WalkDir::new(dir_path)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "xml"))
        .collect();
    files.sort();
    for path in files {
        process_server_file(&path, &mut out)?;
    }
    Ok(out)
}

fn process_server_file(path: &Path, out: &mut HashMap<TenantId, ServerConfig>) -> Result<()> {
    let xml_content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read server config: {}", path.display()))?;
    process_server_data(&xml_content, &path.display().to_string(), out)
}

fn process_server_data(
    xml_content: &str,
    source: &str,
    out: &mut HashMap<TenantId, ServerConfig>,
) -> Result<()> {
    let servers: Servers =
        de::from_str(xml_content).with_context(|| format!("XML parse failed: {}", source))?;
    for node in servers.servers {
        let name = node.name.trim().to_string();
        let config = ServerConfig::try_from(node).with_context(|| format!("In {}", source))?;
        if out.insert(name.clone(), config).is_some() {
            return Err(ConfigError::DuplicateServer(name)).with_context(|| format!("In {}", source));
        }
    }
    Ok(())
}
