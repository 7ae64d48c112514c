//! 通用数据访问对象
//!
//! 绑定一个数据源句柄和一个基础集合名，实体通过 serde 与 BSON 互转。
//! 按样例查询时，null 字段和空字符串字段不参与条件。

use mongodb::bson::{self, Bson, Document, doc, oid::ObjectId};
use rat_logger::debug;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::error::{DatastoreError, DatastoreResult};
use crate::pool::FindSpec;
use crate::registry::Datastore;

/// 文档ID字段
pub const ID_FIELD: &str = "_id";

/// 通用DAO
pub struct BaseDao<T> {
    store: Datastore,
    collection: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for BaseDao<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collection: self.collection.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T> BaseDao<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new<S: Into<String>>(store: Datastore, collection: S) -> Self {
        Self {
            store,
            collection: collection.into(),
            _entity: PhantomData,
        }
    }

    pub fn datastore(&self) -> &Datastore {
        &self.store
    }

    /// 基础集合名（未应用命名模板）
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// 插入实体，返回文档ID
    pub async fn insert(&self, entity: &T) -> DatastoreResult<String> {
        let id = self
            .store
            .insert_one(&self.collection, bson::to_document(entity)?)
            .await?;
        Ok(id_to_string(&id))
    }

    /// 批量插入
    pub async fn insert_batch(&self, entities: &[T]) -> DatastoreResult<Vec<String>> {
        let docs = entities
            .iter()
            .map(bson::to_document)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self.store.insert_many(&self.collection, docs).await?;
        Ok(ids.iter().map(id_to_string).collect())
    }

    /// 查询唯一结果
    ///
    /// 没有匹配时返回 `None`，匹配多于一个时返回 `MultipleResults`。
    /// 最多取两条判断是否唯一，多条时再单独计数
    pub async fn select_one(&self, filter: Document) -> DatastoreResult<Option<T>> {
        let mut docs = self
            .store
            .find(&self.collection, filter.clone(), FindSpec::limit(2))
            .await?;
        match docs.len() {
            0 => Ok(None),
            1 => Ok(Some(bson::from_document(docs.remove(0))?)),
            fetched => {
                let count = self.store.count(&self.collection, filter).await?;
                debug!("唯一查询命中多条: 集合={}, 前 {} 条, 共 {} 条", self.collection, fetched, count);
                Err(DatastoreError::MultipleResults {
                    collection: self.store.collection_name(&self.collection),
                    count: count as usize,
                })
            }
        }
    }

    /// 按样例查询唯一结果
    pub async fn select_one_by_example(&self, example: &T) -> DatastoreResult<Option<T>> {
        self.select_one(example_filter(example)?).await
    }

    pub async fn select_list(&self, filter: Document) -> DatastoreResult<Vec<T>> {
        self.select_with(filter, FindSpec::default()).await
    }

    /// 按样例查询列表
    pub async fn select_list_by_example(&self, example: &T) -> DatastoreResult<Vec<T>> {
        self.select_list(example_filter(example)?).await
    }

    /// 分页查询
    pub async fn select_page(
        &self,
        filter: Document,
        offset: u64,
        limit: i64,
    ) -> DatastoreResult<Vec<T>> {
        self.select_with(filter, FindSpec::page(offset, limit)).await
    }

    /// 按样例分页查询
    pub async fn select_page_by_example(
        &self,
        example: &T,
        offset: u64,
        limit: i64,
    ) -> DatastoreResult<Vec<T>> {
        self.select_page(example_filter(example)?, offset, limit)
            .await
    }

    /// 带排序和分页的查询
    pub async fn select_with(&self, filter: Document, spec: FindSpec) -> DatastoreResult<Vec<T>> {
        let docs = self.store.find(&self.collection, filter, spec).await?;
        docs.into_iter()
            .map(|d| bson::from_document(d).map_err(DatastoreError::from))
            .collect()
    }

    pub async fn select_by_id(&self, id: &str) -> DatastoreResult<Option<T>> {
        self.select_one(doc! { "_id": id_to_bson(id) }).await
    }

    pub async fn select_by_ids(&self, ids: &[&str]) -> DatastoreResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Bson> = ids.iter().map(|id| id_to_bson(id)).collect();
        self.select_list(doc! { "_id": { "$in": ids } }).await
    }

    pub async fn select_count(&self, filter: Document) -> DatastoreResult<u64> {
        self.store.count(&self.collection, filter).await
    }

    /// 按样例计数
    pub async fn select_count_by_example(&self, example: &T) -> DatastoreResult<u64> {
        self.select_count(example_filter(example)?).await
    }

    /// 更新所有匹配文档，`update` 为带操作符的更新文档
    pub async fn update(&self, filter: Document, update: Document) -> DatastoreResult<u64> {
        self.store
            .update_many(&self.collection, filter, update)
            .await
    }

    /// 按样例更新：`values` 中非空字段通过 `$set` 写入
    pub async fn update_by_example(&self, example: &T, values: &T) -> DatastoreResult<u64> {
        let mut set = example_filter(values)?;
        set.remove(ID_FIELD);
        if set.is_empty() {
            debug!("按样例更新没有可写入的字段: 集合={}", self.collection);
            return Ok(0);
        }
        self.update(example_filter(example)?, doc! { "$set": set }).await
    }

    pub async fn delete(&self, filter: Document) -> DatastoreResult<u64> {
        self.store.delete_many(&self.collection, filter).await
    }

    /// 按样例删除；样例没有任何条件时拒绝执行，避免清空整个集合
    pub async fn delete_by_example(&self, example: &T) -> DatastoreResult<u64> {
        let filter = example_filter(example)?;
        if filter.is_empty() {
            return Err(crate::datastore_error!(
                query,
                format!("按样例删除的条件为空: 集合={}", self.collection)
            ));
        }
        self.delete(filter).await
    }

    /// 聚合管道透传
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> DatastoreResult<Vec<Document>> {
        self.store.aggregate(&self.collection, pipeline).await
    }
}

/// 由样例实体生成查询条件
///
/// 跳过 null 和空字符串字段；字符串形式的 `_id` 转为 ObjectId
pub fn example_filter<T: Serialize>(example: &T) -> DatastoreResult<Document> {
    let doc = bson::to_document(example)?;
    Ok(doc
        .into_iter()
        .filter(|(_, value)| match value {
            Bson::Null => false,
            Bson::String(s) => !s.is_empty(),
            _ => true,
        })
        .map(|(key, value)| match value {
            Bson::String(s) if key == ID_FIELD => {
                let id = id_to_bson(&s);
                (key, id)
            }
            value => (key, value),
        })
        .collect())
}

/// 可解析为 ObjectId 的字符串按 ObjectId 处理
fn id_to_bson(id: &str) -> Bson {
    match ObjectId::parse_str(id) {
        Ok(oid) => Bson::ObjectId(oid),
        Err(_) => Bson::String(id.to_string()),
    }
}

fn id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Person {
        #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: Option<String>,
        age: Option<i32>,
    }

    #[test]
    fn test_example_filter_skips_null_and_empty() {
        let filter = example_filter(&Person {
            id: None,
            name: Some(String::new()),
            age: Some(3),
        })
        .unwrap();
        assert_eq!(filter, doc! { "age": 3 });
    }

    #[test]
    fn test_example_filter_converts_object_id() {
        let oid = ObjectId::new();
        let filter = example_filter(&Person {
            id: Some(oid.to_hex()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter, doc! { "_id": oid });

        let filter = example_filter(&Person {
            id: Some("custom-1".to_string()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(filter, doc! { "_id": "custom-1" });
    }

    fn person(name: &str, age: i32) -> Person {
        Person {
            id: None,
            name: Some(name.to_string()),
            age: Some(age),
        }
    }

    async fn memory_dao() -> BaseDao<Person> {
        use crate::config::{ConfigSnapshot, keys};
        use crate::pool::MemoryConnector;
        use crate::registry::DatastoreRegistry;
        use std::sync::Arc;

        let registry = DatastoreRegistry::builder()
            .connector(Arc::new(MemoryConnector::new()))
            .build();
        registry
            .reload(
                ConfigSnapshot::builder()
                    .set(keys::MONGO_SERVERS, "mongodb://h1")
                    .set(keys::MONGO_DB_NAME, "app")
                    .build(),
            )
            .await
            .unwrap();
        BaseDao::new(registry.default_datastore().unwrap(), "people")
    }

    #[tokio::test]
    async fn test_select_one_reports_full_match_count() {
        let dao = memory_dao().await;
        dao.insert_batch(&[person("a", 1), person("b", 1), person("c", 1), person("d", 2)])
            .await
            .unwrap();

        match dao.select_one(doc! { "age": 1 }).await {
            Err(DatastoreError::MultipleResults { collection, count }) => {
                assert_eq!(collection, "people");
                assert_eq!(count, 3);
            }
            other => panic!("期望MultipleResults，实际为 {:?}", other),
        }
        let one = dao.select_one(doc! { "age": 2 }).await.unwrap().unwrap();
        assert_eq!(one.name.as_deref(), Some("d"));
    }

    #[tokio::test]
    async fn test_count_and_page_by_example() {
        let dao = memory_dao().await;
        dao.insert_batch(&[person("a", 1), person("b", 1), person("c", 1), person("d", 2)])
            .await
            .unwrap();

        let example = Person {
            age: Some(1),
            ..Default::default()
        };
        assert_eq!(dao.select_count_by_example(&example).await.unwrap(), 3);
        assert_eq!(dao.select_count_by_example(&Person::default()).await.unwrap(), 4);

        let page = dao.select_page_by_example(&example, 1, 5).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page.iter().all(|p| p.age == Some(1)));
        assert_eq!(dao.select_page_by_example(&example, 0, 1).await.unwrap().len(), 1);
    }

    #[test]
    fn test_id_to_string() {
        let oid = ObjectId::new();
        assert_eq!(id_to_string(&Bson::ObjectId(oid)), oid.to_hex());
        assert_eq!(id_to_string(&Bson::String("k".into())), "k");
    }
}
