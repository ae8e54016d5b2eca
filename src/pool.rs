use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{NativeError, PoolError};
use crate::models::options::ServiceOptions;
use crate::models::pool_config::PoolConfig;
use crate::models::server_config::{ServerConfig, TenantId};
use crate::native::{NativeConnection, NativeConnector, NativeFolder, SessionOptions};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 池中的一个原生会话
struct NativeHandle {
    id: u64,
    conn: Box<dyn NativeConnection>,
    // 未关闭的文件夹留在连接上，下次借出时可复用
    cached_folder: Option<Box<dyn NativeFolder>>,
    idle_since: Instant,
}

struct Checkout {
    handle: NativeHandle,
    folder: Option<Box<dyn NativeFolder>>,
    _permit: OwnedSemaphorePermit,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    invalidated: AtomicU64,
    borrows: AtomicU64,
    returns: AtomicU64,
    checked_out: AtomicUsize,
}

/// Point-in-time view of one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    pub tenant: TenantId,
    pub max_size: usize,
    pub idle: usize,
    pub checked_out: usize,
    pub created: u64,
    pub invalidated: u64,
    pub borrows: u64,
    pub returns: u64,
    pub closed: bool,
}

struct PoolInner {
    tenant: TenantId,
    server: ServerConfig,
    config: PoolConfig,
    session: SessionOptions,
    logon_retries: u32,
    close_folder_on_return: bool,
    connector: Arc<dyn NativeConnector>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<NativeHandle>>,
    closed: AtomicBool,
    next_id: AtomicU64,
    counters: Counters,
}

/// 单个租户的连接池
/// Bounded pool of native sessions for one tenant.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Validates the configuration and builds an empty pool.
    pub fn new(
        tenant: impl Into<TenantId>,
        server: ServerConfig,
        config: PoolConfig,
        options: &ServiceOptions,
        connector: Arc<dyn NativeConnector>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        if server.host.trim().is_empty() {
            return Err(PoolError::InvalidConfig("server host is empty".into()));
        }
        let inner = PoolInner {
            tenant: tenant.into(),
            server,
            semaphore: Arc::new(Semaphore::new(config.max_size)),
            config,
            session: SessionOptions {
                max_hits: options.max_hits,
                trace_level: options.trace_level,
            },
            logon_retries: options.retry.logon_retries,
            close_folder_on_return: options.close_folder_on_return,
            connector,
            idle: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            counters: Counters::default(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Builds the pool and logs on `min_idle` sessions up front.
    pub async fn connect(
        tenant: impl Into<TenantId>,
        server: ServerConfig,
        config: PoolConfig,
        options: &ServiceOptions,
        connector: Arc<dyn NativeConnector>,
    ) -> Result<Self, PoolError> {
        let pool = Self::new(tenant, server, config, options, connector)?;
        if let Err(e) = pool.warm_up().await {
            // 已登录的会话在返回错误前登出
            if let Err(close_err) = pool.close().await {
                warn!("closing '{}' after failed warm-up: {}", pool.tenant(), close_err);
            }
            return Err(e);
        }
        Ok(pool)
    }

    pub fn tenant(&self) -> &str {
        &self.inner.tenant
    }

    pub fn server(&self) -> &ServerConfig {
        &self.inner.server
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn close_folder_on_return(&self) -> bool {
        self.inner.close_folder_on_return
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub async fn warm_up(&self) -> Result<(), PoolError> {
        let missing = self
            .inner
            .config
            .min_idle
            .saturating_sub(lock(&self.inner.idle).len());
        for _ in 0..missing {
            let handle = self.inner.logon().await?;
            lock(&self.inner.idle).push_back(handle);
        }
        if missing > 0 {
            info!("pool warmed up: tenant={}, sessions={}", self.inner.tenant, missing);
        }
        Ok(())
    }

    /// 借出一个连接，必要时创建新会话
    pub async fn borrow(&self) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(PoolError::Closed(inner.tenant.clone()));
        }

        let start = Instant::now();
        let wait = inner.config.borrow_timeout;
        let permit = match tokio::time::timeout(wait, inner.semaphore.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::Closed(inner.tenant.clone())),
            Err(_) => {
                return Err(PoolError::Exhausted {
                    tenant: inner.tenant.clone(),
                    waited: wait,
                });
            }
        };
        if self.is_closed() {
            return Err(PoolError::Closed(inner.tenant.clone()));
        }

        let handle = match inner.take_idle().await {
            Some(handle) => handle,
            None => inner.logon().await?,
        };

        inner.counters.borrows.fetch_add(1, Ordering::SeqCst);
        inner.counters.checked_out.fetch_add(1, Ordering::SeqCst);
        debug!(
            "borrow: tenant={}, handle={}, elapsed_ms={}",
            inner.tenant,
            handle.id,
            start.elapsed().as_millis()
        );

        let mut handle = handle;
        let folder = handle.cached_folder.take();
        Ok(PooledConnection {
            pool: inner.clone(),
            checkout: Some(Checkout {
                handle,
                folder,
                _permit: permit,
            }),
            invalidated: false,
            in_call: false,
            borrowed_at: Instant::now(),
        })
    }

    /// 关闭连接池：空闲连接立即登出，借出中的连接在归还时登出
    pub async fn close(&self) -> Result<(), PoolError> {
        let inner = &self.inner;
        if inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        inner.semaphore.close();

        let drained: Vec<NativeHandle> = lock(&inner.idle).drain(..).collect();
        let count = drained.len();
        let mut first_err = None;
        for handle in drained {
            if let Err(e) = inner.discard(handle).await {
                warn!("{}", e);
                first_err.get_or_insert(e);
            }
        }
        info!(
            "pool closed: tenant={}, idle_closed={}, still_checked_out={}",
            inner.tenant,
            count,
            inner.counters.checked_out.load(Ordering::SeqCst)
        );
        first_err.map_or(Ok(()), Err)
    }

    pub fn status(&self) -> PoolStatus {
        let c = &self.inner.counters;
        PoolStatus {
            tenant: self.inner.tenant.clone(),
            max_size: self.inner.config.max_size,
            idle: lock(&self.inner.idle).len(),
            checked_out: c.checked_out.load(Ordering::SeqCst),
            created: c.created.load(Ordering::SeqCst),
            invalidated: c.invalidated.load(Ordering::SeqCst),
            borrows: c.borrows.load(Ordering::SeqCst),
            returns: c.returns.load(Ordering::SeqCst),
            closed: self.is_closed(),
        }
    }
}

impl PoolInner {
    async fn logon(&self) -> Result<NativeHandle, PoolError> {
        let attempts = self.logon_retries + 1;
        let mut attempt = 1;
        loop {
            match self
                .connector
                .logon(&self.tenant, &self.server, &self.session)
                .await
            {
                Ok(conn) => {
                    self.counters.created.fetch_add(1, Ordering::SeqCst);
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        "logon: tenant={}, endpoint={}, handle={}, attempt={}",
                        self.tenant,
                        self.server.endpoint(),
                        id,
                        attempt
                    );
                    return Ok(NativeHandle {
                        id,
                        conn,
                        cached_folder: None,
                        idle_since: Instant::now(),
                    });
                }
                Err(e) if attempt < attempts => {
                    warn!(
                        "logon to '{}' failed (attempt {}/{}), retrying: {}",
                        self.tenant, attempt, attempts, e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    return Err(PoolError::Logon {
                        tenant: self.tenant.clone(),
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Pops the most recently used idle handle that is still usable.
    async fn take_idle(&self) -> Option<NativeHandle> {
        loop {
            let mut handle = lock(&self.idle).pop_back()?;
            let expired = self
                .config
                .idle_timeout
                .is_some_and(|ttl| handle.idle_since.elapsed() > ttl);
            let usable = !expired && (!self.config.test_on_borrow || handle.conn.is_alive().await);
            if usable {
                return Some(handle);
            }
            debug!(
                "discarding idle handle: tenant={}, handle={}, expired={}",
                self.tenant, handle.id, expired
            );
            if let Err(e) = self.discard(handle).await {
                warn!("{}", e);
            }
        }
    }

    /// Closes any folder left on the handle and logs it off. The handle is gone either way.
    async fn discard(&self, mut handle: NativeHandle) -> Result<(), PoolError> {
        self.counters.invalidated.fetch_add(1, Ordering::SeqCst);
        if let Some(mut folder) = handle.cached_folder.take() {
            if let Err(e) = folder.close().await {
                warn!("{}", self.cleanup_error(e));
            }
        }
        handle
            .conn
            .logoff()
            .await
            .map_err(|e| self.cleanup_error(e))
    }

    async fn give_back(&self, checkout: Checkout, invalidated: bool) {
        let Checkout {
            mut handle,
            folder,
            _permit,
        } = checkout;
        self.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
        self.counters.returns.fetch_add(1, Ordering::SeqCst);

        if let Some(mut folder) = folder {
            if self.close_folder_on_return || invalidated {
                if let Err(e) = folder.close().await {
                    warn!("{}", self.cleanup_error(e));
                }
            } else {
                handle.cached_folder = Some(folder);
            }
        }

        let to_discard = if invalidated {
            Some(handle)
        } else {
            handle.idle_since = Instant::now();
            let mut idle = lock(&self.idle);
            if self.closed.load(Ordering::Acquire) {
                Some(handle)
            } else {
                debug!("return: tenant={}, handle={}", self.tenant, handle.id);
                idle.push_back(handle);
                None
            }
        };

        if let Some(handle) = to_discard {
            debug!(
                "return: tenant={}, handle={} invalidated",
                self.tenant, handle.id
            );
            if let Err(e) = self.discard(handle).await {
                warn!("{}", e);
            }
        }
    }

    fn cleanup_error(&self, source: NativeError) -> PoolError {
        PoolError::Cleanup {
            tenant: self.tenant.clone(),
            source,
        }
    }
}

/// 借出的连接；`release` 或 drop 时一定归还连接池
/// A checked-out session. It goes back to its pool on `release`, or on drop
/// when the owning task panicked, returned early or was cancelled.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    checkout: Option<Checkout>,
    invalidated: bool,
    in_call: bool,
    borrowed_at: Instant,
}

impl PooledConnection {
    pub fn tenant(&self) -> &str {
        &self.pool.tenant
    }

    pub fn handle_id(&self) -> Option<u64> {
        self.checkout.as_ref().map(|c| c.handle.id)
    }

    pub fn time_in_use(&self) -> Duration {
        self.borrowed_at.elapsed()
    }

    /// Marks the session unusable; it is logged off instead of going back to idle.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Brackets a native call. A guard dropped between the two is never reused.
    pub(crate) fn enter_call(&mut self) {
        self.in_call = true;
    }

    pub(crate) fn exit_call(&mut self) {
        self.in_call = false;
    }

    /// Name of the folder currently open on this connection.
    pub fn open_folder_name(&self) -> Option<&str> {
        self.checkout
            .as_ref()
            .and_then(|c| c.folder.as_ref())
            .map(|f| f.name())
    }

    fn checkout_mut(&mut self) -> Result<&mut Checkout, NativeError> {
        self.checkout
            .as_mut()
            .ok_or_else(|| NativeError::SessionLost("connection already returned".into()))
    }

    pub fn connection(&mut self) -> Result<&mut dyn NativeConnection, NativeError> {
        Ok(&mut *self.checkout_mut()?.handle.conn)
    }

    /// 打开文件夹；同名文件夹已打开时直接复用
    pub async fn open_folder(&mut self, name: &str) -> Result<&mut dyn NativeFolder, NativeError> {
        let tenant = self.pool.tenant.clone();
        let checkout = self.checkout_mut()?;
        let folder = match checkout.folder.take() {
            Some(folder) if folder.name() == name => folder,
            previous => {
                if let Some(mut old) = previous {
                    if let Err(e) = old.close().await {
                        warn!("closing folder '{}' on '{}' failed: {}", old.name(), tenant, e);
                    }
                }
                checkout.handle.conn.open_folder(name).await?
            }
        };
        Ok(&mut **checkout.folder.insert(folder))
    }

    pub async fn release(mut self) {
        if let Some(checkout) = self.checkout.take() {
            self.pool.give_back(checkout, self.invalidated).await;
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(checkout) = self.checkout.take() else {
            return;
        };
        let pool = self.pool.clone();
        // 调用中途被丢弃的会话状态未知，只能登出
        let invalidated = self.invalidated || self.in_call;
        if self.in_call {
            debug!(
                "handle {} on '{}' dropped during a native call, invalidating",
                checkout.handle.id, pool.tenant
            );
        }
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move {
                    pool.give_back(checkout, invalidated).await;
                });
            }
            Err(_) => {
                // 没有运行时无法登出，直接丢弃会话，释放容量
                warn!(
                    "no runtime to return handle {} to '{}', dropping it",
                    checkout.handle.id, pool.tenant
                );
                pool.counters.checked_out.fetch_sub(1, Ordering::SeqCst);
                pool.counters.returns.fetch_add(1, Ordering::SeqCst);
                pool.counters.invalidated.fetch_add(1, Ordering::SeqCst);
                drop(checkout);
            }
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::native::memory::MemoryConnector;

    fn pool_with(connector: Arc<MemoryConnector>, config: PoolConfig) -> ConnectionPool {
        ConnectionPool::new(
            "portal",
            ServerConfig::new("cmod.local", "svc"),
            config,
            &ServiceOptions::new(),
            connector,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn released_handle_is_reused() {
        let connector = Arc::new(MemoryConnector::new());
        connector.add_tenant("portal", ["A"]);
        let pool = pool_with(connector.clone(), PoolConfig::new().max_size(2));

        let first = pool.borrow().await.unwrap();
        let id = first.handle_id();
        first.release().await;
        let second = pool.borrow().await.unwrap();
        assert_eq!(second.handle_id(), id);
        second.release().await;

        let status = pool.status();
        assert_eq!(status.created, 1);
        assert_eq!(status.borrows, status.returns);
        assert_eq!(status.idle, 1);
    }

    #[tokio::test]
    async fn host_must_be_set() {
        let err = ConnectionPool::new(
            "portal",
            ServerConfig::new(" ", "svc"),
            PoolConfig::new(),
            &ServiceOptions::new(),
            Arc::new(MemoryConnector::new()),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn dead_idle_session_is_replaced_on_borrow() {
        let connector = Arc::new(MemoryConnector::new());
        let tenant = connector.add_tenant("portal", ["A"]);
        let pool = pool_with(connector.clone(), PoolConfig::new().test_on_borrow(true));

        pool.borrow().await.unwrap().release().await;
        tenant.kill_sessions();
        let conn = pool.borrow().await.unwrap();
        conn.release().await;

        let status = pool.status();
        assert_eq!(status.created, 2);
        assert_eq!(status.invalidated, 1);
        assert_eq!(status.idle, 1);
    }
}
