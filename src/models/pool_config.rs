use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::error::{ConfigError, PoolError};
use crate::models::{parse_flag, parse_prop};

/// 单个租户连接池的参数
/// Tuning parameters for one tenant's connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_size: usize,               // 池最大连接数
    pub min_idle: usize,               // 创建时预先登录的连接数
    pub borrow_timeout: Duration,      // 获取连接的最长等待时间
    pub idle_timeout: Option<Duration>, // 空闲超过该时长的连接在借出前被丢弃
    pub test_on_borrow: bool,          // 借出前校验会话是否存活
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 0,
            borrow_timeout: Duration::from_secs(10),
            idle_timeout: Some(Duration::from_secs(30 * 60)),
            test_on_borrow: true,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn borrow_timeout(mut self, timeout: Duration) -> Self {
        self.borrow_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn test_on_borrow(mut self, test_on_borrow: bool) -> Self {
        self.test_on_borrow = test_on_borrow;
        self
    }

    /// Reads `pool.*` keys from a flat property map on top of the defaults.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(v) = parse_prop(props, "pool.maxTotal")? {
            cfg.max_size = v;
        }
        if let Some(v) = parse_prop(props, "pool.minIdle")? {
            cfg.min_idle = v;
        }
        if let Some(ms) = parse_prop::<u64>(props, "pool.maxWaitMs")? {
            cfg.borrow_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_prop::<u64>(props, "pool.idleTimeoutMs")? {
            cfg.idle_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(v) = parse_flag(props, "pool.testOnBorrow")? {
            cfg.test_on_borrow = v;
        }
        Ok(cfg)
    }

    pub(crate) fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::InvalidConfig("max_size must be at least 1".into()));
        }
        if self.max_size > Semaphore::MAX_PERMITS {
            return Err(PoolError::InvalidConfig(format!(
                "max_size ({}) exceeds the limit of {}",
                self.max_size,
                Semaphore::MAX_PERMITS
            )));
        }
        if self.min_idle > self.max_size {
            return Err(PoolError::InvalidConfig(format!(
                "min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_override_defaults() {
        let props: HashMap<String, String> = [
            ("pool.maxTotal", "3"),
            ("pool.maxWaitMs", "250"),
            ("pool.idleTimeoutMs", "0"),
            ("pool.testOnBorrow", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let cfg = PoolConfig::from_properties(&props).unwrap();
        assert_eq!(cfg.max_size, 3);
        assert_eq!(cfg.min_idle, 0);
        assert_eq!(cfg.borrow_timeout, Duration::from_millis(250));
        assert_eq!(cfg.idle_timeout, None);
        assert!(!cfg.test_on_borrow);
    }

    #[test]
    fn min_idle_above_max_is_rejected() {
        let cfg = PoolConfig::new().max_size(2).min_idle(3);
        assert!(matches!(cfg.validate(), Err(PoolError::InvalidConfig(_))));
        assert!(PoolConfig::new().max_size(0).validate().is_err());
        assert!(PoolConfig::new().validate().is_ok());
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let props: HashMap<String, String> =
            HashMap::from([("pool.maxTotal".to_string(), usize::MAX.to_string())]);
        let cfg = PoolConfig::from_properties(&props).unwrap();
        assert_eq!(cfg.max_size, usize::MAX);
        assert!(matches!(cfg.validate(), Err(PoolError::InvalidConfig(_))));
        assert!(
            PoolConfig::new()
                .max_size(Semaphore::MAX_PERMITS)
                .validate()
                .is_ok()
        );
    }
}
