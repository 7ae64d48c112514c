//! 文档存储接口
//!
//! 连接池面向具体驱动的唯一接缝，集合名在这一层已经是最终名称

use crate::error::DatastoreResult;
use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

/// 查询选项
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    /// 跳过的文档数
    pub skip: Option<u64>,
    /// 返回的最大文档数
    pub limit: Option<i64>,
    /// 排序，`{字段: 1 | -1}`
    pub sort: Option<Document>,
}

impl FindSpec {
    /// 分页查询
    pub fn page(offset: u64, limit: i64) -> Self {
        Self {
            skip: Some(offset),
            limit: Some(limit),
            sort: None,
        }
    }

    /// 只限制返回数量
    pub fn limit(limit: i64) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// 设置排序
    pub fn with_sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// 文档存储trait，定义连接池转发的底层操作
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// 绑定的物理库名
    fn database_name(&self) -> &str;

    /// 插入单个文档，返回文档ID
    async fn insert_one(&self, collection: &str, doc: Document) -> DatastoreResult<Bson>;

    /// 批量插入，按输入顺序返回文档ID
    async fn insert_many(&self, collection: &str, docs: Vec<Document>)
    -> DatastoreResult<Vec<Bson>>;

    /// 条件查询
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
    ) -> DatastoreResult<Vec<Document>>;

    /// 统计数量
    async fn count(&self, collection: &str, filter: Document) -> DatastoreResult<u64>;

    /// 更新所有匹配文档，返回修改数量
    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DatastoreResult<u64>;

    /// 删除所有匹配文档，返回删除数量
    async fn delete_many(&self, collection: &str, filter: Document) -> DatastoreResult<u64>;

    /// 聚合管道透传
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>>;

    /// 原始命令透传
    async fn run_command(&self, command: Document) -> DatastoreResult<Document>;

    /// 物理关闭底层连接
    async fn close(&self);
}
