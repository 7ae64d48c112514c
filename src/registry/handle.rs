//! 数据源句柄

use mongodb::bson::{Bson, Document};
use std::fmt;
use std::sync::Arc;

use super::{DatastoreRegistry, PoolEntry, RegistryKey};
use crate::error::DatastoreResult;
use crate::naming::NamingTemplate;
use crate::pool::{FindSpec, Pool};

/// 数据源句柄
///
/// 调用者持有的稳定引用。每次调用都从条目加载当前连接池，
/// 重载后的下一次调用自动使用新连接池，句柄本身不需要更新。
#[derive(Clone)]
pub struct Datastore {
    registry: DatastoreRegistry,
    entry: Arc<PoolEntry>,
}

impl Datastore {
    pub(crate) fn new(registry: DatastoreRegistry, entry: Arc<PoolEntry>) -> Self {
        Self { registry, entry }
    }

    pub fn key(&self) -> &RegistryKey {
        self.entry.key()
    }

    /// 当前生效的连接池
    pub fn current_pool(&self) -> Arc<Pool> {
        self.entry.current()
    }

    /// 物理库名
    pub fn database_name(&self) -> String {
        self.current_pool().database_name().to_string()
    }

    /// 按本句柄的命名模板计算实际集合名
    pub fn collection_name(&self, base: &str) -> String {
        self.current_pool().collection_name(base)
    }

    /// 切换到另一个库
    pub async fn use_database(&self, database: &str) -> DatastoreResult<Datastore> {
        self.registry.get_or_create(database, None).await
    }

    /// 另一个库的前缀变体，集合名为 `<prefix>_<集合>`
    pub async fn with_prefix(&self, database: &str, prefix: &str) -> DatastoreResult<Datastore> {
        let template = NamingTemplate::prefixed(prefix)?;
        self.registry.get_or_create(database, Some(template)).await
    }

    /// 另一个库的后缀变体，集合名为 `<集合>_<suffix>`
    pub async fn with_suffix(&self, database: &str, suffix: &str) -> DatastoreResult<Datastore> {
        let template = NamingTemplate::suffixed(suffix)?;
        self.registry.get_or_create(database, Some(template)).await
    }

    pub async fn insert_one(&self, collection: &str, doc: Document) -> DatastoreResult<Bson> {
        self.current_pool().insert_one(collection, doc).await
    }

    pub async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> DatastoreResult<Vec<Bson>> {
        self.current_pool().insert_many(collection, docs).await
    }

    pub async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
    ) -> DatastoreResult<Vec<Document>> {
        self.current_pool().find(collection, filter, spec).await
    }

    /// 返回第一个匹配文档
    pub async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> DatastoreResult<Option<Document>> {
        let spec = FindSpec {
            limit: Some(1),
            ..Default::default()
        };
        let docs = self.current_pool().find(collection, filter, spec).await?;
        Ok(docs.into_iter().next())
    }

    pub async fn count(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        self.current_pool().count(collection, filter).await
    }

    pub async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DatastoreResult<u64> {
        self.current_pool()
            .update_many(collection, filter, update)
            .await
    }

    pub async fn delete_many(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        self.current_pool().delete_many(collection, filter).await
    }

    pub async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>> {
        self.current_pool().aggregate(collection, pipeline).await
    }

    pub async fn run_command(&self, command: Document) -> DatastoreResult<Document> {
        self.current_pool().run_command(command).await
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Datastore(db={})", self.current_pool().database_name())
    }
}

impl fmt::Debug for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datastore")
            .field("key", self.key())
            .field("pool", &self.current_pool().id())
            .finish()
    }
}
