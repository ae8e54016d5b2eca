//! 内存版文档服务
//!
//! A deterministic in-process document service. Each tenant keeps an ordered
//! folder list and the documents ingested into it. Every native call is counted
//! and most of them can be made to fail on demand, so pool and facade behaviour
//! can be observed from the outside.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::NativeError;
use crate::models::server_config::ServerConfig;
use crate::native::{
    FolderNames, NativeConnection, NativeConnector, NativeFolder, NativeStatus, ReportSubmission,
    SessionOptions,
};

const MEMORY_CONNECTOR: &str = "memory";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// How `add_report` answers once the document has been accepted by the folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestMode {
    /// Status 0; with `issue_ids == false` the document id is empty.
    Accept { issue_ids: bool },
    Reject { code: i32, message: String },
    /// The call returns but carries no status.
    NoStatus,
}

#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub doc_id: String,
    pub client_id: String,
    pub application_group: String,
    pub application: String,
    pub fields: HashMap<String, String>,
    pub size: usize,
    pub stored_at: DateTime<Utc>,
}

/// 原生调用计数
#[derive(Debug, Default)]
pub struct CallStats {
    pub logons: AtomicU64,
    pub logon_failures: AtomicU64,
    pub logoffs: AtomicU64,
    pub folder_count_calls: AtomicU64,
    pub folder_names_calls: AtomicU64,
    pub folders_opened: AtomicU64,
    pub folders_closed: AtomicU64,
    pub add_report_calls: AtomicU64,
}

impl CallStats {
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Store {
    folders: Vec<String>,
    documents: HashMap<String, Vec<StoredDocument>>,
    next_id: u64,
}

/// One simulated document-service endpoint.
#[derive(Debug)]
pub struct MemoryTenant {
    name: String,
    store: Mutex<Store>,
    mode: Mutex<IngestMode>,
    latency: Mutex<Option<Duration>>,
    session_epoch: AtomicU64,
    session_limit: Mutex<Option<u64>>,
    fail_next_logons: AtomicU32,
    lose_next_calls: AtomicU32,
    fail_folder_listing: AtomicBool,
    fail_add_report: AtomicBool,
    fail_folder_close: AtomicBool,
    pub stats: CallStats,
}

impl MemoryTenant {
    fn new(name: &str, folders: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            store: Mutex::new(Store {
                folders,
                ..Store::default()
            }),
            mode: Mutex::new(IngestMode::Accept { issue_ids: true }),
            latency: Mutex::new(None),
            session_epoch: AtomicU64::new(0),
            session_limit: Mutex::new(None),
            fail_next_logons: AtomicU32::new(0),
            lose_next_calls: AtomicU32::new(0),
            fail_folder_listing: AtomicBool::new(false),
            fail_add_report: AtomicBool::new(false),
            fail_folder_close: AtomicBool::new(false),
            stats: CallStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_folder(&self, folder: impl Into<String>) {
        lock(&self.store).folders.push(folder.into());
    }

    pub fn folders(&self) -> Vec<String> {
        lock(&self.store).folders.clone()
    }

    pub fn documents(&self, folder: &str) -> Vec<StoredDocument> {
        lock(&self.store)
            .documents
            .get(folder)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_ingest_mode(&self, mode: IngestMode) {
        *lock(&self.mode) = mode;
    }

    /// Fixed delay applied to every native call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    pub fn fail_next_logons(&self, n: u32) {
        self.fail_next_logons.store(n, Ordering::SeqCst);
    }

    /// Caps the number of sessions logged on at the same time.
    pub fn limit_sessions(&self, limit: Option<u64>) {
        *lock(&self.session_limit) = limit;
    }

    fn session_slots_left(&self) -> bool {
        let live = CallStats::get(&self.stats.logons) - CallStats::get(&self.stats.logoffs);
        lock(&self.session_limit).is_none_or(|limit| live < limit)
    }

    /// The next `n` session-bound calls fail with `SessionLost`.
    pub fn lose_next_calls(&self, n: u32) {
        self.lose_next_calls.store(n, Ordering::SeqCst);
    }

    /// Invalidates every session opened so far.
    pub fn kill_sessions(&self) {
        self.session_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub fn fail_folder_listing(&self, fail: bool) {
        self.fail_folder_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_add_report(&self, fail: bool) {
        self.fail_add_report.store(fail, Ordering::SeqCst);
    }

    pub fn fail_folder_close(&self, fail: bool) {
        self.fail_folder_close.store(fail, Ordering::SeqCst);
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_session(&self, epoch: u64) -> Result<(), NativeError> {
        if epoch != self.session_epoch.load(Ordering::SeqCst) {
            return Err(NativeError::SessionLost(format!(
                "session on '{}' expired",
                self.name
            )));
        }
        if Self::take_one(&self.lose_next_calls) {
            return Err(NativeError::SessionLost(format!(
                "connection to '{}' dropped",
                self.name
            )));
        }
        Ok(())
    }
}

/// 内存版连接工厂
/// Connector over a set of in-memory tenants.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    tenants: DashMap<String, Arc<MemoryTenant>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a tenant with an ordered folder list.
    pub fn add_tenant<I, S>(&self, tenant: &str, folders: I) -> Arc<MemoryTenant>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = Arc::new(MemoryTenant::new(
            tenant,
            folders.into_iter().map(Into::into).collect(),
        ));
        self.tenants.insert(tenant.to_string(), state.clone());
        state
    }

    pub fn tenant(&self, tenant: &str) -> Option<Arc<MemoryTenant>> {
        self.tenants.get(tenant).map(|t| t.value().clone())
    }
}

#[async_trait]
impl NativeConnector for MemoryConnector {
    fn name(&self) -> &str {
        MEMORY_CONNECTOR
    }

    async fn logon(
        &self,
        tenant: &str,
        server: &ServerConfig,
        session: &SessionOptions,
    ) -> Result<Box<dyn NativeConnection>, NativeError> {
        let state = self
            .tenant(tenant)
            .ok_or_else(|| NativeError::Logon(format!("cannot reach {}", server.endpoint())))?;
        state.delay().await;
        if !state.session_slots_left() {
            state.stats.logon_failures.fetch_add(1, Ordering::SeqCst);
            return Err(NativeError::Logon(format!(
                "{} has no free sessions for '{}'",
                server.endpoint(),
                server.user
            )));
        }
        if MemoryTenant::take_one(&state.fail_next_logons) {
            state.stats.logon_failures.fetch_add(1, Ordering::SeqCst);
            return Err(NativeError::Logon(format!(
                "logon of '{}' to {} refused",
                server.user,
                server.endpoint()
            )));
        }
        let session_id = state.stats.logons.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "memory logon: tenant={}, session={}, max_hits={}, trace_level={}",
            tenant, session_id, session.max_hits, session.trace_level
        );
        let epoch = state.session_epoch.load(Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            tenant: state,
            epoch,
            logged_off: false,
        }))
    }
}

pub struct MemoryConnection {
    tenant: Arc<MemoryTenant>,
    epoch: u64,
    logged_off: bool,
}

impl MemoryConnection {
    fn check(&self) -> Result<(), NativeError> {
        if self.logged_off {
            return Err(NativeError::SessionLost("session logged off".into()));
        }
        self.tenant.check_session(self.epoch)
    }
}

#[async_trait]
impl NativeConnection for MemoryConnection {
    async fn folder_count(&mut self) -> Result<usize, NativeError> {
        self.tenant.delay().await;
        self.tenant
            .stats
            .folder_count_calls
            .fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.tenant.fail_folder_listing.load(Ordering::SeqCst) {
            return Err(NativeError::Server("folder count unavailable".into()));
        }
        Ok(lock(&self.tenant.store).folders.len())
    }

    async fn folder_names(&mut self) -> Result<FolderNames, NativeError> {
        self.tenant.delay().await;
        self.tenant
            .stats
            .folder_names_calls
            .fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if self.tenant.fail_folder_listing.load(Ordering::SeqCst) {
            return Err(NativeError::Server("folder enumeration unavailable".into()));
        }
        let names = lock(&self.tenant.store).folders.clone();
        Ok(FolderNames::new(names))
    }

    async fn open_folder(&mut self, name: &str) -> Result<Box<dyn NativeFolder>, NativeError> {
        self.tenant.delay().await;
        self.check()?;
        if !lock(&self.tenant.store).folders.iter().any(|f| f == name) {
            return Err(NativeError::Folder(format!("folder '{}' not found", name)));
        }
        self.tenant.stats.folders_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryFolder {
            tenant: self.tenant.clone(),
            name: name.to_string(),
            epoch: self.epoch,
            closed: false,
        }))
    }

    async fn is_alive(&mut self) -> bool {
        !self.logged_off && self.epoch == self.tenant.session_epoch.load(Ordering::SeqCst)
    }

    async fn logoff(&mut self) -> Result<(), NativeError> {
        if self.logged_off {
            return Ok(());
        }
        self.logged_off = true;
        self.tenant.stats.logoffs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MemoryFolder {
    tenant: Arc<MemoryTenant>,
    name: String,
    epoch: u64,
    closed: bool,
}

#[async_trait]
impl NativeFolder for MemoryFolder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add_report(
        &mut self,
        report: &ReportSubmission<'_>,
    ) -> Result<NativeStatus, NativeError> {
        self.tenant.delay().await;
        self.tenant
            .stats
            .add_report_calls
            .fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(NativeError::Folder(format!("folder '{}' is closed", self.name)));
        }
        self.tenant.check_session(self.epoch)?;
        if self.tenant.fail_add_report.load(Ordering::SeqCst) {
            return Err(NativeError::Server(format!(
                "load of {} bytes into '{}' failed",
                report.content.len(),
                self.name
            )));
        }

        let mode = lock(&self.tenant.mode).clone();
        if let IngestMode::Reject { code, message } = mode {
            return Ok(NativeStatus::rejected(code, message));
        }

        let mut store = lock(&self.tenant.store);
        store.next_id += 1;
        let doc_id = format!("DOC-{:06}", store.next_id);
        store
            .documents
            .entry(self.name.clone())
            .or_default()
            .push(StoredDocument {
                doc_id: doc_id.clone(),
                client_id: report.client_id.to_string(),
                application_group: report.application_group.to_string(),
                application: report.application.to_string(),
                fields: report.fields.clone(),
                size: report.content.len(),
                stored_at: Utc::now(),
            });

        Ok(match mode {
            IngestMode::Accept { issue_ids: true } => NativeStatus::ok(Some(doc_id)),
            IngestMode::Accept { issue_ids: false } => NativeStatus::ok(None),
            _ => NativeStatus::unavailable(),
        })
    }

    async fn close(&mut self) -> Result<(), NativeError> {
        if self.tenant.fail_folder_close.load(Ordering::SeqCst) {
            return Err(NativeError::Folder(format!(
                "close of folder '{}' failed",
                self.name
            )));
        }
        if !self.closed {
            self.closed = true;
            self.tenant.stats.folders_closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
