//! 连接池调优参数
//!
//! 所有参数都来自配置快照，缺省值与历史部署保持一致

use super::keys;
use super::snapshot::ConfigSnapshot;
use crate::error::DatastoreResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 读偏好
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

impl ReadPreferenceMode {
    /// 按名称解析，大小写不敏感
    pub fn parse(name: &str) -> DatastoreResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            other => Err(crate::datastore_error!(
                config,
                format!("不支持的读偏好: {}", other)
            )),
        }
    }

    /// 连接串中使用的名称
    pub fn as_uri_value(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

impl fmt::Display for ReadPreferenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_uri_value())
    }
}

/// 文档映射策略
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingOptions {
    /// 是否保存空数组/空子文档
    pub store_empties: bool,
    /// 是否保存 null 字段
    pub store_nulls: bool,
    /// 实体扫描范围，原样透传给映射层
    pub map_package: Option<String>,
    /// 扫描时是否忽略无效实体
    pub ignore_invalid_classes: bool,
}

/// 连接池调优参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolTuning {
    pub read_preference: ReadPreferenceMode,
    pub server_selection_timeout: Duration,
    pub max_wait_time: Duration,
    pub max_connection_life_time: Duration,
    pub max_connection_idle_time: Duration,
    pub max_connections_per_host: u32,
    pub connect_timeout: Duration,
    pub socket_timeout: Duration,
    /// 应用名称，部分驱动版本不支持，失败时忽略
    pub app_name: Option<String>,
    pub mapping: MappingOptions,
}

impl Default for PoolTuning {
    fn default() -> Self {
        Self {
            read_preference: ReadPreferenceMode::Primary,
            server_selection_timeout: Duration::from_millis(10_000),
            max_wait_time: Duration::from_millis(120_000),
            max_connection_life_time: Duration::from_millis(86_400_000),
            max_connection_idle_time: Duration::from_millis(30_000),
            max_connections_per_host: 100,
            connect_timeout: Duration::from_millis(5_000),
            socket_timeout: Duration::from_millis(60_000),
            app_name: None,
            mapping: MappingOptions::default(),
        }
    }
}

impl PoolTuning {
    /// 从配置快照读取调优参数
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> DatastoreResult<Self> {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> DatastoreResult<Duration> {
            snapshot
                .get_u64_or(key, default.as_millis() as u64)
                .map(Duration::from_millis)
        };

        let max_connections = snapshot.get_u64_or(
            keys::MAX_CONNECTIONS_PER_HOST,
            defaults.max_connections_per_host as u64,
        )?;

        Ok(Self {
            read_preference: ReadPreferenceMode::parse(
                snapshot.get_or(keys::READ_PREFERENCE, "primary"),
            )?,
            server_selection_timeout: millis(
                keys::SERVER_SELECTION_TIMEOUT,
                defaults.server_selection_timeout,
            )?,
            max_wait_time: millis(keys::MAX_WAIT_TIME, defaults.max_wait_time)?,
            max_connection_life_time: millis(
                keys::MAX_CONNECTION_LIFE_TIME,
                defaults.max_connection_life_time,
            )?,
            max_connection_idle_time: millis(
                keys::MAX_CONNECTION_IDLE_TIME,
                defaults.max_connection_idle_time,
            )?,
            max_connections_per_host: u32::try_from(max_connections).map_err(|_| {
                crate::datastore_error!(
                    config,
                    format!("{} 超出范围: {}", keys::MAX_CONNECTIONS_PER_HOST, max_connections)
                )
            })?,
            connect_timeout: millis(keys::CONNECT_TIMEOUT, defaults.connect_timeout)?,
            socket_timeout: millis(keys::SOCKET_TIMEOUT, defaults.socket_timeout)?,
            app_name: None,
            mapping: MappingOptions {
                store_empties: snapshot.get_bool(keys::STORE_EMPTIES),
                store_nulls: snapshot.get_bool(keys::STORE_NULLS),
                map_package: snapshot.get(keys::MAP_PACKAGE).map(str::to_string),
                ignore_invalid_classes: snapshot.get_bool(keys::IGNORE_INVALID_CLASSES),
            },
        })
    }

    /// 设置应用名称
    pub fn with_app_name<S: Into<String>>(mut self, app_name: Option<S>) -> Self {
        self.app_name = app_name.map(Into::into);
        self
    }
}
