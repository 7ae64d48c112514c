//! 数据源注册表
//!
//! 按 (逻辑库名, 命名模板) 缓存连接池条目，并负责配置变更时的原子替换。
//! 读路径无锁：句柄每次调用都从条目中加载当前连接池。

mod drain;
mod entry;
mod handle;
mod reload;

pub use entry::{PoolEntry, RegistryKey};
pub use handle::Datastore;
pub use reload::{ReloadReport, ReloadState};

use dashmap::DashMap;
use parking_lot::Mutex;
use once_cell::sync::Lazy;
use rat_logger::{info, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::AbortHandle;

use crate::config::{ConfigSnapshot, PoolTuning};
use crate::error::{DatastoreError, DatastoreResult};
use crate::naming::NamingTemplate;
use crate::pool::{MongoConnector, Pool, PoolBuilder, PoolConnector};
use crate::resolver::{self, PasswordDecryptor, PlainTextDecryptor};
use drain::PendingCloseSet;

/// 旧连接池的默认关闭宽限期
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

type Slot = Arc<OnceCell<Arc<PoolEntry>>>;

/// 全局注册表，使用 MongoDB 驱动和默认参数
static GLOBAL_REGISTRY: Lazy<DatastoreRegistry> = Lazy::new(DatastoreRegistry::new);

/// 获取全局注册表
pub fn global_registry() -> &'static DatastoreRegistry {
    &GLOBAL_REGISTRY
}

struct RegistryInner {
    /// 键 -> 单次初始化槽位
    entries: DashMap<RegistryKey, Slot>,
    /// 当前配置快照，首次加载前为空
    config: RwLock<Option<Arc<ConfigSnapshot>>>,
    builder: PoolBuilder,
    decryptor: Arc<dyn PasswordDecryptor>,
    app_name: Option<String>,
    grace_period: Duration,
    /// 首次加载创建的条目
    default_key: parking_lot::RwLock<Option<RegistryKey>>,
    state: AtomicU8,
    drain: PendingCloseSet,
    watchers: Mutex<Vec<AbortHandle>>,
    shut_down: AtomicBool,
}

/// 数据源注册表
///
/// 克隆代价很低，所有克隆共享同一份状态
#[derive(Clone)]
pub struct DatastoreRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for DatastoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatastoreRegistry")
            .field("keys", &self.keys())
            .field("state", &self.state())
            .field("grace_period", &self.inner.grace_period)
            .finish()
    }
}

/// 注册表构建器
pub struct RegistryBuilder {
    connector: Option<Arc<dyn PoolConnector>>,
    decryptor: Option<Arc<dyn PasswordDecryptor>>,
    grace_period: Duration,
    app_name: Option<String>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            connector: None,
            decryptor: None,
            grace_period: DEFAULT_GRACE_PERIOD,
            app_name: None,
        }
    }
}

impl RegistryBuilder {
    /// 设置底层连接器，默认使用 MongoDB 驱动
    pub fn connector(mut self, connector: Arc<dyn PoolConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 设置密码解密器，默认原样返回
    pub fn decryptor(mut self, decryptor: Arc<dyn PasswordDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// 设置旧连接池的关闭宽限期
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// 设置应用名称
    pub fn app_name<S: Into<String>>(mut self, app_name: S) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn build(self) -> DatastoreRegistry {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(MongoConnector::new()));
        let decryptor = self
            .decryptor
            .unwrap_or_else(|| Arc::new(PlainTextDecryptor));

        info!("创建数据源注册表，关闭宽限期: {:?}", self.grace_period);

        DatastoreRegistry {
            inner: Arc::new(RegistryInner {
                entries: DashMap::new(),
                config: RwLock::new(None),
                builder: PoolBuilder::new(connector),
                decryptor,
                app_name: self.app_name,
                grace_period: self.grace_period,
                default_key: parking_lot::RwLock::new(None),
                state: AtomicU8::new(ReloadState::Idle as u8),
                drain: PendingCloseSet::new(),
                watchers: Mutex::new(Vec::new()),
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}

impl Default for DatastoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DatastoreRegistry {
    /// 使用 MongoDB 驱动和默认参数创建注册表
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// 关闭宽限期
    pub fn grace_period(&self) -> Duration {
        self.inner.grace_period
    }

    /// 获取或创建数据源句柄
    ///
    /// 条目已存在时无锁返回；否则同一个键只会有一个调用者真正建池，
    /// 其余并发调用者等待并共享结果。建池失败不会留下条目，后续调用会重试。
    ///
    /// # 参数
    /// * `database` - 逻辑库名，为空时使用配置的默认库名
    /// * `template` - 集合命名模板
    pub async fn get_or_create(
        &self,
        database: &str,
        template: Option<NamingTemplate>,
    ) -> DatastoreResult<Datastore> {
        let database = database.trim();
        if !database.is_empty() {
            let key = RegistryKey::new(database, template.clone());
            if let Some(entry) = self.lookup(&key) {
                return Ok(Datastore::new(self.clone(), entry));
            }
        }

        self.ensure_running()?;
        let config = self.inner.config.read().await;
        // 可能排在 shutdown 的写锁之后
        self.ensure_running()?;
        let snapshot = (*config).clone().ok_or(DatastoreError::NotInitialized)?;

        let database = if database.is_empty() {
            resolver::initial_database_name(&snapshot)?
        } else {
            database.to_string()
        };
        let key = RegistryKey::new(database, template);
        let entry = self.create_entry(&snapshot, key).await?;
        drop(config);

        Ok(Datastore::new(self.clone(), entry))
    }

    /// 所有已初始化的键
    pub fn keys(&self) -> Vec<RegistryKey> {
        let mut keys: Vec<RegistryKey> = self
            .inner
            .entries
            .iter()
            .filter_map(|slot| slot.value().get().map(|entry| entry.key().clone()))
            .collect();
        keys.sort();
        keys
    }

    /// 原子替换条目中的连接池，返回旧连接池
    ///
    /// 不会删除或重建条目，已持有句柄的调用者在下一次调用时看到新连接池
    pub fn swap(&self, key: &RegistryKey, pool: Arc<Pool>) -> DatastoreResult<Arc<Pool>> {
        let entry = self
            .lookup(key)
            .ok_or_else(|| crate::datastore_error!(key_not_found, key))?;
        let old = entry.replace(pool);
        crate::debug_log!("条目 {} 已切换连接池: {} -> {}", key, old.id(), entry.current().id());
        Ok(old)
    }

    /// 首次加载时创建的默认数据源
    pub fn default_datastore(&self) -> DatastoreResult<Datastore> {
        let key = self
            .inner
            .default_key
            .read()
            .clone()
            .ok_or(DatastoreError::NotInitialized)?;
        let entry = self
            .lookup(&key)
            .ok_or_else(|| crate::datastore_error!(key_not_found, key))?;
        Ok(Datastore::new(self.clone(), entry))
    }

    /// 当前配置快照
    pub async fn config(&self) -> Option<Arc<ConfigSnapshot>> {
        self.inner.config.read().await.clone()
    }

    /// 等待关闭的旧连接池数量
    pub fn pending_close(&self) -> usize {
        self.inner.drain.pending_pools()
    }

    /// 获取所有条目的状态信息
    ///
    /// 返回包含每个条目状态的详细信息，包括：
    /// - 逻辑库名和命名模板
    /// - 当前连接池ID与创建时间
    /// - 打码后的连接串
    pub fn status(&self) -> HashMap<String, serde_json::Value> {
        let mut status = HashMap::new();
        for key in self.keys() {
            if let Some(entry) = self.lookup(&key) {
                let pool = entry.current();
                status.insert(
                    key.to_string(),
                    json!({
                        "database": key.database(),
                        "template": key.template().map(NamingTemplate::pattern),
                        "pool_id": pool.id().to_string(),
                        "target": pool.target().redacted_uri(),
                        "created_at": pool.created_at().to_rfc3339(),
                        "closed": pool.is_closed(),
                        "reload_state": self.state().to_string(),
                        "pending_close": self.pending_close(),
                    }),
                );
            }
        }
        status
    }

    /// 关闭注册表
    ///
    /// 停止配置监听，取消所有延迟关闭定时器并立即关闭待关闭和在用的连接池。
    /// 关闭后已有句柄的调用会返回 `PoolClosed`。
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("开始关闭数据源注册表");

        for watcher in self.inner.watchers.lock().drain(..) {
            watcher.abort();
        }

        // 等待进行中的重载结束
        let _config = self.inner.config.write().await;

        let drained = self.inner.drain.close_all().await;
        let mut closed = 0;
        for key in self.keys() {
            if let Some(entry) = self.lookup(&key) {
                entry.current().close().await;
                closed += 1;
            }
        }
        info!(
            "数据源注册表已关闭: 在用连接池 {} 个, 待关闭连接池 {} 个",
            closed, drained
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn ensure_running(&self) -> DatastoreResult<()> {
        if self.is_shut_down() {
            return Err(crate::datastore_error!(config, "数据源注册表已关闭"));
        }
        Ok(())
    }

    fn lookup(&self, key: &RegistryKey) -> Option<Arc<PoolEntry>> {
        self.inner
            .entries
            .get(key)
            .and_then(|slot| slot.value().get().cloned())
    }

    /// 在给定快照下创建条目，调用方负责持有配置读锁
    async fn create_entry(
        &self,
        snapshot: &ConfigSnapshot,
        key: RegistryKey,
    ) -> DatastoreResult<Arc<PoolEntry>> {
        let slot: Slot = self
            .inner
            .entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = slot
            .get_or_try_init(|| async {
                info!("创建数据源条目: {}", key);
                let pool = self.build_pool(snapshot, &key).await.map_err(|e| {
                    warn!("创建数据源条目 {} 失败: {}", key, e);
                    e
                })?;
                Ok::<_, DatastoreError>(Arc::new(PoolEntry::new(key.clone(), pool)))
            })
            .await;

        match result {
            Ok(entry) => Ok(entry.clone()),
            Err(e) => {
                // 只移除没有其他等待者的空槽位：映射和本调用各持有一份引用
                self.inner.entries.remove_if(&key, |_, s| {
                    s.get().is_none() && Arc::ptr_eq(s, &slot) && Arc::strong_count(s) <= 2
                });
                Err(e)
            }
        }
    }

    /// 解析连接目标并构建连接池
    async fn build_pool(&self, snapshot: &ConfigSnapshot, key: &RegistryKey) -> DatastoreResult<Pool> {
        let target = resolver::resolve(snapshot, key.database(), self.inner.decryptor.as_ref())?;
        let tuning = PoolTuning::from_snapshot(snapshot)?.with_app_name(self.inner.app_name.clone());
        self.inner
            .builder
            .build(target, key.template().cloned(), &tuning)
            .await
    }
}
