use std::error::Error;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{IngestError, NativeError};
use crate::native::{NativeStatus, ReportSubmission};
use crate::pool::PooledConnection;
use crate::service::sanitize::sanitize;

/// 在借出的连接上执行的一次原生调用
#[async_trait]
pub(crate) trait NativeCall: Sync {
    type Output: Send;

    fn name(&self) -> &'static str;

    async fn call(&self, conn: &mut PooledConnection) -> Result<Self::Output, NativeError>;

    /// Wraps a native failure with whatever context this call carries.
    fn failure(&self, e: NativeError) -> Box<dyn Error + Send + Sync> {
        Box::new(e)
    }
}

pub(crate) struct ListFolders;

#[async_trait]
impl NativeCall for ListFolders {
    type Output = Vec<String>;

    fn name(&self) -> &'static str {
        "list_folders"
    }

    async fn call(&self, conn: &mut PooledConnection) -> Result<Vec<String>, NativeError> {
        let native = conn.connection()?;
        let count = native.folder_count().await?;
        let names = native.folder_names().await?;
        let folders: Vec<String> = names.map(|name| sanitize(&name)).collect();
        if folders.len() != count {
            debug!(
                "folder count mismatch: reported={}, enumerated={}",
                count,
                folders.len()
            );
        }
        Ok(folders)
    }
}

pub(crate) struct AddReport<'a> {
    pub folder: &'a str,
    pub submission: ReportSubmission<'a>,
}

#[async_trait]
impl<'a> NativeCall for AddReport<'a> {
    type Output = NativeStatus;

    fn name(&self) -> &'static str {
        "ingest_document"
    }

    async fn call(&self, conn: &mut PooledConnection) -> Result<NativeStatus, NativeError> {
        let folder = conn.open_folder(self.folder).await?;
        folder.add_report(&self.submission).await
    }

    fn failure(&self, e: NativeError) -> Box<dyn Error + Send + Sync> {
        Box::new(IngestError::Native {
            folder: self.folder.to_string(),
            source: e,
        })
    }
}
