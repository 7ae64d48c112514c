//! 注册表键与条目

use arc_swap::ArcSwap;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::naming::NamingTemplate;
use crate::pool::Pool;

/// 注册表键：逻辑库名 + 可选命名模板
///
/// 同一个库的不同模板是两个独立的槽位
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RegistryKey {
    database: String,
    template: Option<NamingTemplate>,
}

impl RegistryKey {
    pub fn new<S: Into<String>>(database: S, template: Option<NamingTemplate>) -> Self {
        Self {
            database: database.into(),
            template,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn template(&self) -> Option<&NamingTemplate> {
        self.template.as_ref()
    }
}

impl fmt::Display for RegistryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.template {
            Some(template) => write!(f, "{}:{}", self.database, template),
            None => f.write_str(&self.database),
        }
    }
}

/// 注册表条目
///
/// 始终持有一个已初始化的连接池，替换是一次原子指针存储
pub struct PoolEntry {
    key: RegistryKey,
    pool: ArcSwap<Pool>,
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("key", &self.key)
            .field("pool", &self.pool.load().id())
            .finish()
    }
}

impl PoolEntry {
    pub(crate) fn new(key: RegistryKey, pool: Pool) -> Self {
        Self {
            key,
            pool: ArcSwap::from_pointee(pool),
        }
    }

    pub fn key(&self) -> &RegistryKey {
        &self.key
    }

    /// 当前连接池，无锁读取
    pub fn current(&self) -> Arc<Pool> {
        self.pool.load_full()
    }

    /// 原子替换，返回旧连接池
    pub(crate) fn replace(&self, pool: Arc<Pool>) -> Arc<Pool> {
        self.pool.swap(pool)
    }
}
