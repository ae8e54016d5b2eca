pub mod options;
pub mod pool_config;
pub mod server_config;

use std::collections::HashMap;

use crate::error::ConfigError;

/// 从属性表中读取并解析单个值，缺失时返回 `None`
pub(crate) fn parse_prop<T: std::str::FromStr>(
    props: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            }),
    }
}

/// Boolean properties accept `true/false`, `1/0` and `yes/no`.
pub(crate) fn parse_flag(
    props: &HashMap<String, String>,
    key: &str,
) -> Result<Option<bool>, ConfigError> {
    match props.get(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            }),
        },
    }
}
