//! 配置重载
//!
//! 状态机 `Idle -> Resolving -> Swapping -> Draining -> Idle`：
//! 先在新快照下为每个键重新解析并建池，再逐个原子替换，
//! 最后把替换下来的旧连接池作为一个批次登记延迟关闭。

use futures::future::join_all;
use rat_logger::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::{DatastoreRegistry, RegistryKey};
use crate::config::ConfigSnapshot;
use crate::error::DatastoreResult;
use crate::resolver;

/// 重载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ReloadState {
    Idle = 0,
    Resolving = 1,
    Swapping = 2,
    Draining = 3,
}

impl ReloadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Resolving,
            2 => Self::Swapping,
            3 => Self::Draining,
            _ => Self::Idle,
        }
    }
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Resolving => "resolving",
            Self::Swapping => "swapping",
            Self::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// 一次重载的结果
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReloadReport {
    /// 首次加载时创建的默认条目
    pub initialized: Option<RegistryKey>,
    /// 已替换连接池的键
    pub replaced: Vec<RegistryKey>,
    /// 重建失败、保留旧连接池的键及原因
    pub failed: Vec<(RegistryKey, String)>,
    /// 本轮登记延迟关闭的旧连接池数量
    pub scheduled_close: usize,
}

impl ReloadReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

impl DatastoreRegistry {
    /// 当前重载状态
    pub fn state(&self) -> ReloadState {
        ReloadState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ReloadState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    /// 应用新的配置快照
    ///
    /// 首次加载创建默认条目，失败时返回错误；之后的重载中单个键失败只记录日志，
    /// 保留该键的旧连接池，其余键照常替换。重载之间串行执行。
    pub async fn reload(&self, snapshot: ConfigSnapshot) -> DatastoreResult<ReloadReport> {
        self.ensure_running()?;
        let snapshot = Arc::new(snapshot);

        let mut config = self.inner.config.write().await;
        // 可能排在 shutdown 的写锁之后
        self.ensure_running()?;
        self.set_state(ReloadState::Resolving);
        *config = Some(snapshot.clone());
        // 降级为读锁：允许新建条目使用新快照，同时阻止下一轮重载进入
        let _config = config.downgrade();

        let result = self.reload_locked(&snapshot).await;
        self.set_state(ReloadState::Idle);

        match &result {
            Ok(report) => info!(
                "配置重载完成: 替换 {} 个, 失败 {} 个, 待关闭 {} 个",
                report.replaced.len(),
                report.failed.len(),
                report.scheduled_close
            ),
            Err(e) => error!("配置重载失败: {}", e),
        }
        result
    }

    async fn reload_locked(&self, snapshot: &ConfigSnapshot) -> DatastoreResult<ReloadReport> {
        let keys = self.keys();
        if keys.is_empty() {
            return self.load_first(snapshot).await;
        }

        let mut report = ReloadReport::default();

        let built = join_all(keys.into_iter().map(|key| async move {
            let result = self.build_pool(snapshot, &key).await;
            (key, result)
        }))
        .await;

        let mut replacements = Vec::with_capacity(built.len());
        for (key, result) in built {
            match result {
                Ok(pool) => replacements.push((key, Arc::new(pool))),
                Err(e) => {
                    warn!("重建连接池失败，保留旧连接池: 键={}, 错误={}", key, e);
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        self.set_state(ReloadState::Swapping);
        let mut retired = Vec::with_capacity(replacements.len());
        for (key, pool) in replacements {
            match self.swap(&key, pool) {
                Ok(old) => {
                    retired.push(old);
                    report.replaced.push(key);
                }
                Err(e) => {
                    error!("替换连接池失败: 键={}, 错误={}", key, e);
                    report.failed.push((key, e.to_string()));
                }
            }
        }

        self.set_state(ReloadState::Draining);
        if !retired.is_empty() {
            report.scheduled_close = retired.len();
            self.inner.drain.schedule(retired, self.inner.grace_period);
        }

        Ok(report)
    }

    /// 首次加载：按 mongo.dbName、连接串库名、admin 的顺序确定默认库
    async fn load_first(&self, snapshot: &ConfigSnapshot) -> DatastoreResult<ReloadReport> {
        let database = resolver::initial_database_name(snapshot)?;
        let key = RegistryKey::new(database, None);
        self.create_entry(snapshot, key.clone()).await?;
        *self.inner.default_key.write() = Some(key.clone());
        info!("首次加载完成，默认数据源: {}", key);

        Ok(ReloadReport {
            initialized: Some(key),
            ..Default::default()
        })
    }

    /// 监听配置变更
    ///
    /// 每次通道值变化触发一次重载，连续的变更会被通道合并。
    /// 通道当前值视为已加载，发送端关闭或注册表关闭时任务结束。
    pub fn watch_config(&self, mut receiver: watch::Receiver<ConfigSnapshot>) -> JoinHandle<()> {
        let registry = self.clone();
        let handle = tokio::spawn(async move {
            while receiver.changed().await.is_ok() {
                if registry.is_shut_down() {
                    break;
                }
                let snapshot = receiver.borrow_and_update().clone();
                if let Err(e) = registry.reload(snapshot).await {
                    error!("配置变更处理失败: {}", e);
                }
            }
            info!("配置监听已停止");
        });

        let mut watchers = self.inner.watchers.lock();
        watchers.retain(|w| !w.is_finished());
        watchers.push(handle.abort_handle());
        drop(watchers);

        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use crate::pool::MemoryConnector;
    use std::time::Duration;

    fn snapshot(servers: &str) -> ConfigSnapshot {
        ConfigSnapshot::builder()
            .set(keys::MONGO_SERVERS, servers)
            .set(keys::MONGO_DB_NAME, "app")
            .build()
    }

    #[tokio::test]
    async fn test_first_load_sets_default() {
        let registry = DatastoreRegistry::builder()
            .connector(Arc::new(MemoryConnector::new()))
            .build();
        let report = registry.reload(snapshot("mongodb://h1")).await.unwrap();
        assert_eq!(report.initialized, Some(RegistryKey::new("app", None)));
        assert!(report.replaced.is_empty());
        assert_eq!(registry.state(), ReloadState::Idle);
        assert_eq!(registry.default_datastore().unwrap().database_name(), "app");
    }

    #[tokio::test]
    async fn test_first_load_falls_back_to_admin() {
        let registry = DatastoreRegistry::builder()
            .connector(Arc::new(MemoryConnector::new()))
            .build();
        let snapshot = ConfigSnapshot::builder()
            .set(keys::MONGO_SERVERS, "mongodb://h1")
            .build();
        let report = registry.reload(snapshot).await.unwrap();
        assert_eq!(report.initialized, Some(RegistryKey::new("admin", None)));
    }

    #[tokio::test]
    async fn test_first_load_failure_propagates() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_unreachable("h1", true);
        let registry = DatastoreRegistry::builder().connector(connector.clone()).build();
        assert!(registry.reload(snapshot("mongodb://h1")).await.is_err());
        assert_eq!(registry.state(), ReloadState::Idle);

        connector.set_unreachable("h1", false);
        let report = registry.reload(snapshot("mongodb://h1")).await.unwrap();
        assert!(report.initialized.is_some());
    }

    #[tokio::test]
    async fn test_reload_replaces_every_key() {
        let registry = DatastoreRegistry::builder()
            .connector(Arc::new(MemoryConnector::new()))
            .grace_period(Duration::from_secs(30))
            .build();
        registry.reload(snapshot("mongodb://h1")).await.unwrap();
        registry.get_or_create("billing", None).await.unwrap();

        let report = registry.reload(snapshot("mongodb://h2")).await.unwrap();
        assert_eq!(report.replaced.len(), 2);
        assert_eq!(report.scheduled_close, 2);
        assert!(report.is_clean());
        assert_eq!(registry.pending_close(), 2);
    }

    #[tokio::test]
    async fn test_reload_queued_behind_shutdown() {
        let connector = Arc::new(MemoryConnector::new());
        let registry = DatastoreRegistry::builder()
            .connector(connector.clone())
            .grace_period(Duration::from_secs(30))
            .build();
        registry.reload(snapshot("mongodb://h1")).await.unwrap();
        let old = registry.default_datastore().unwrap().current_pool();

        let guard = registry.inner.config.write().await;
        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.reload(snapshot("mongodb://h2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.inner.shut_down.store(true, Ordering::Release);
        drop(guard);

        assert!(pending.await.unwrap().is_err());
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(registry.pending_close(), 0);
        assert_eq!(old.target().hosts(), ["h1".to_string()]);
        assert_eq!(
            registry.config().await.unwrap().get(keys::MONGO_SERVERS),
            Some("mongodb://h1")
        );
    }

    #[tokio::test]
    async fn test_watch_config_applies_changes() {
        let registry = DatastoreRegistry::builder()
            .connector(Arc::new(MemoryConnector::new()))
            .grace_period(Duration::from_millis(10))
            .build();
        registry.reload(snapshot("mongodb://h1")).await.unwrap();

        let (tx, rx) = watch::channel(snapshot("mongodb://h1"));
        let watcher = registry.watch_config(rx);

        tx.send(snapshot("mongodb://h2")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let store = registry.default_datastore().unwrap();
        assert_eq!(store.current_pool().target().hosts(), ["h2".to_string()]);

        drop(tx);
        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .unwrap()
            .unwrap();
    }
}
