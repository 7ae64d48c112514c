//! 连接池核心模块
//!
//! 一个连接池 = 一组底层连接 + 绑定到同一目标的文档映射上下文

use chrono::{DateTime, Utc};
use mongodb::bson::{Bson, Document};
use rat_logger::{debug, info};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use super::store::{DocumentStore, FindSpec};
use crate::config::MappingOptions;
use crate::error::{DatastoreError, DatastoreResult};
use crate::naming::{NamingTemplate, apply_template};
use crate::resolver::ConnectionTarget;

/// 文档映射上下文
///
/// 同一连接池的所有读写都经过同一个命名模板与空值策略
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingContext {
    template: Option<NamingTemplate>,
    options: MappingOptions,
}

impl MappingContext {
    pub fn new(template: Option<NamingTemplate>, options: MappingOptions) -> Self {
        Self { template, options }
    }

    pub fn template(&self) -> Option<&NamingTemplate> {
        self.template.as_ref()
    }

    pub fn options(&self) -> &MappingOptions {
        &self.options
    }

    /// 计算实际集合名
    pub fn collection_name(&self, base: &str) -> String {
        apply_template(self.template.as_ref(), base)
    }

    /// 按映射策略清理待写入的文档
    pub fn prepare(&self, doc: Document) -> Document {
        if self.options.store_nulls && self.options.store_empties {
            return doc;
        }
        self.strip(doc)
    }

    fn strip(&self, doc: Document) -> Document {
        doc.into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    Bson::Document(sub) => Bson::Document(self.strip(sub)),
                    other => other,
                };
                let keep = match &value {
                    Bson::Null => self.options.store_nulls,
                    Bson::Array(items) if items.is_empty() => self.options.store_empties,
                    Bson::Document(sub) if sub.is_empty() => self.options.store_empties,
                    _ => true,
                };
                keep.then_some((key, value))
            })
            .collect()
    }
}

/// 连接池
pub struct Pool {
    id: Uuid,
    target: ConnectionTarget,
    mapping: MappingContext,
    store: Arc<dyn DocumentStore>,
    created_at: DateTime<Utc>,
    closed: AtomicBool,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("template", &self.mapping.template)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Pool {
    /// 由构建器调用
    pub(crate) fn new(
        target: ConnectionTarget,
        mapping: MappingContext,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            mapping,
            store,
            created_at: Utc::now(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn mapping(&self) -> &MappingContext {
        &self.mapping
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// 物理库名
    pub fn database_name(&self) -> &str {
        self.store.database_name()
    }

    /// 计算实际集合名
    pub fn collection_name(&self, base: &str) -> String {
        self.mapping.collection_name(base)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DatastoreResult<()> {
        if self.is_closed() {
            return Err(DatastoreError::PoolClosed {
                database: self.database_name().to_string(),
            });
        }
        Ok(())
    }

    /// 插入单个文档
    pub async fn insert_one(&self, collection: &str, doc: Document) -> DatastoreResult<Bson> {
        self.ensure_open()?;
        let collection = self.collection_name(collection);
        debug!("插入文档: 库={}, 集合={}", self.database_name(), collection);
        self.store
            .insert_one(&collection, self.mapping.prepare(doc))
            .await
    }

    /// 批量插入
    pub async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> DatastoreResult<Vec<Bson>> {
        self.ensure_open()?;
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let collection = self.collection_name(collection);
        let docs = docs.into_iter().map(|d| self.mapping.prepare(d)).collect();
        self.store.insert_many(&collection, docs).await
    }

    /// 条件查询
    pub async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
    ) -> DatastoreResult<Vec<Document>> {
        self.ensure_open()?;
        let collection = self.collection_name(collection);
        self.store.find(&collection, filter, spec).await
    }

    /// 统计数量
    pub async fn count(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        self.ensure_open()?;
        let collection = self.collection_name(collection);
        self.store.count(&collection, filter).await
    }

    /// 更新所有匹配文档
    pub async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DatastoreResult<u64> {
        self.ensure_open()?;
        let collection = self.collection_name(collection);
        self.store.update_many(&collection, filter, update).await
    }

    /// 删除所有匹配文档
    pub async fn delete_many(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        self.ensure_open()?;
        let collection = self.collection_name(collection);
        self.store.delete_many(&collection, filter).await
    }

    /// 聚合管道透传
    pub async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>> {
        self.ensure_open()?;
        let collection = self.collection_name(collection);
        self.store.aggregate(&collection, pipeline).await
    }

    /// 原始命令透传
    pub async fn run_command(&self, command: Document) -> DatastoreResult<Document> {
        self.ensure_open()?;
        self.store.run_command(command).await
    }

    /// 物理关闭，重复调用只生效一次
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store.close().await;
        info!("连接池已关闭: id={}, 目标={}", self.id, self.target);
    }
}
