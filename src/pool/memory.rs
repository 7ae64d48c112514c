//! 进程内文档存储
//!
//! 按主机列表区分"服务器"、按库名区分数据库，用于测试和演示，
//! 语义上等同于 SQLite 的 `:memory:` 库。只支持等值 / `$in` 过滤，
//! `$set` / `$unset` / `$inc` 更新，以及 `$match` / `$skip` / `$limit` 聚合阶段。

use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::{Bson, Document, doc, oid::ObjectId};
use parking_lot::RwLock;
use rat_logger::{debug, info};
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::builder::PoolConnector;
use super::store::{DocumentStore, FindSpec};
use crate::config::PoolTuning;
use crate::error::{DatastoreError, DatastoreResult};
use crate::resolver::ConnectionTarget;

type Collections = HashMap<String, Vec<Document>>;

/// 内存数据库
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<Collections>,
}

impl MemoryDatabase {
    /// 集合中的文档数（测试辅助）
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// 所有集合名
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// 内存服务器，对应一组主机
#[derive(Debug, Default)]
pub struct MemoryServer {
    databases: DashMap<String, Arc<MemoryDatabase>>,
}

impl MemoryServer {
    /// 获取或创建数据库
    pub fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::default()))
            .clone()
    }
}

/// 内存连接器
#[derive(Debug, Default)]
pub struct MemoryConnector {
    servers: DashMap<String, Arc<MemoryServer>>,
    unreachable: DashMap<String, ()>,
    connect_count: AtomicUsize,
    connect_delay: RwLock<Option<Duration>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取主机列表对应的服务器
    pub fn server(&self, hosts: &str) -> Arc<MemoryServer> {
        self.servers
            .entry(hosts.to_string())
            .or_insert_with(|| Arc::new(MemoryServer::default()))
            .clone()
    }

    /// 之后对该主机列表的连接全部失败
    pub fn set_unreachable(&self, hosts: &str, unreachable: bool) {
        if unreachable {
            self.unreachable.insert(hosts.to_string(), ());
        } else {
            self.unreachable.remove(hosts);
        }
    }

    /// 每次连接前等待，用于模拟慢握手
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.connect_delay.write() = delay;
    }

    /// 累计建立的连接池数
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PoolConnector for MemoryConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        _tuning: &PoolTuning,
    ) -> DatastoreResult<Arc<dyn DocumentStore>> {
        let delay = *self.connect_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let host_key = target.host_key();
        if self.unreachable.contains_key(&host_key) {
            return Err(crate::datastore_error!(
                connection,
                format!("无法连接到 {}", target)
            ));
        }

        let database = target.database().ok_or_else(|| {
            crate::datastore_error!(config, format!("连接目标未指定数据库: {}", target))
        })?;

        self.connect_count.fetch_add(1, Ordering::SeqCst);
        debug!("建立内存连接: {}", target);

        Ok(Arc::new(MemoryStore {
            database_name: database.to_string(),
            host_key: host_key.clone(),
            database: self.server(&host_key).database(database),
            closed: AtomicBool::new(false),
        }))
    }
}

/// 内存文档存储
#[derive(Debug)]
pub struct MemoryStore {
    database_name: String,
    host_key: String,
    database: Arc<MemoryDatabase>,
    closed: AtomicBool,
}

impl MemoryStore {
    fn ensure_open(&self) -> DatastoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatastoreError::PoolClosed {
                database: self.database_name.clone(),
            });
        }
        Ok(())
    }

    fn with_ids(docs: Vec<Document>) -> (Vec<Document>, Vec<Bson>) {
        let mut ids = Vec::with_capacity(docs.len());
        let docs = docs
            .into_iter()
            .map(|mut d| {
                if !d.contains_key("_id") {
                    d.insert("_id", ObjectId::new());
                }
                ids.push(d.get("_id").cloned().unwrap_or(Bson::Null));
                d
            })
            .collect();
        (docs, ids)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn database_name(&self) -> &str {
        &self.database_name
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> DatastoreResult<Bson> {
        let mut ids = self.insert_many(collection, vec![doc]).await?;
        Ok(ids.pop().unwrap_or(Bson::Null))
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> DatastoreResult<Vec<Bson>> {
        self.ensure_open()?;
        let (docs, ids) = Self::with_ids(docs);
        let mut collections = self.database.collections.write();
        let target = collections.entry(collection.to_string()).or_default();
        for d in &docs {
            if let Some(id) = d.get("_id") {
                if target.iter().any(|existing| existing.get("_id") == Some(id)) {
                    return Err(crate::datastore_error!(
                        query,
                        format!("重复的 _id: {} (集合 {})", id, collection)
                    ));
                }
            }
        }
        target.extend(docs);
        Ok(ids)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
    ) -> DatastoreResult<Vec<Document>> {
        self.ensure_open()?;
        let mut matched: Vec<Document> = {
            let collections = self.database.collections.read();
            collections
                .get(collection)
                .map(|docs| {
                    docs.iter()
                        .filter(|d| matches_filter(d, &filter))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        };

        if let Some(sort) = &spec.sort {
            sort_documents(&mut matched, sort);
        }
        let skip = spec.skip.unwrap_or(0) as usize;
        let limit = match spec.limit {
            Some(l) if l != 0 => l.unsigned_abs() as usize,
            _ => usize::MAX,
        };
        Ok(matched.into_iter().skip(skip).take(limit).collect())
    }

    async fn count(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        self.ensure_open()?;
        let collections = self.database.collections.read();
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches_filter(d, &filter)).count() as u64)
            .unwrap_or(0))
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DatastoreResult<u64> {
        self.ensure_open()?;
        for key in update.keys() {
            if !matches!(key.as_str(), "$set" | "$unset" | "$inc") {
                return Err(crate::datastore_error!(
                    query,
                    format!("内存存储不支持的更新操作符: {}", key)
                ));
            }
        }

        let mut collections = self.database.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut modified = 0;
        for d in docs.iter_mut().filter(|d| matches_filter(d, &filter)) {
            let before = d.clone();
            apply_update(d, &update)?;
            if *d != before {
                modified += 1;
            }
        }
        Ok(modified)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        self.ensure_open()?;
        let mut collections = self.database.collections.write();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let before = docs.len();
        docs.retain(|d| !matches_filter(d, &filter));
        Ok((before - docs.len()) as u64)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>> {
        let mut docs = self.find(collection, Document::new(), FindSpec::default()).await?;
        for stage in pipeline {
            let (op, arg) = stage.into_iter().next().ok_or_else(|| {
                crate::datastore_error!(query, "聚合阶段不能为空")
            })?;
            docs = match (op.as_str(), arg) {
                ("$match", Bson::Document(filter)) => docs
                    .into_iter()
                    .filter(|d| matches_filter(d, &filter))
                    .collect(),
                ("$skip", n) => docs.into_iter().skip(bson_as_usize(&n)).collect(),
                ("$limit", n) => docs.into_iter().take(bson_as_usize(&n)).collect(),
                (other, _) => {
                    return Err(crate::datastore_error!(
                        query,
                        format!("内存存储不支持的聚合阶段: {}", other)
                    ));
                }
            };
        }
        Ok(docs)
    }

    async fn run_command(&self, command: Document) -> DatastoreResult<Document> {
        self.ensure_open()?;
        match command.keys().next().map(String::as_str) {
            Some("ping") => Ok(doc! { "ok": 1 }),
            Some("listCollections") => {
                let names: Vec<Bson> = self
                    .database
                    .collection_names()
                    .into_iter()
                    .map(|n| Bson::Document(doc! { "name": n }))
                    .collect();
                Ok(doc! { "cursor": { "firstBatch": names }, "ok": 1 })
            }
            other => Err(crate::datastore_error!(
                query,
                format!("内存存储不支持的命令: {:?}", other)
            )),
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("内存连接已关闭: 主机={}, 库={}", self.host_key, self.database_name);
        }
    }
}

fn bson_as_usize(value: &Bson) -> usize {
    match value {
        Bson::Int32(n) => (*n).max(0) as usize,
        Bson::Int64(n) => (*n).max(0) as usize,
        Bson::Double(n) => n.max(0.0) as usize,
        _ => 0,
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (a, b) {
        (Bson::Int32(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Int32(x)) => *x as i64 == *y,
        (Bson::Double(x), Bson::Int32(y)) | (Bson::Int32(y), Bson::Double(x)) => *x == *y as f64,
        (Bson::Double(x), Bson::Int64(y)) | (Bson::Int64(y), Bson::Double(x)) => *x == *y as f64,
        _ => a == b,
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| {
        let actual = doc.get(key);
        match expected {
            Bson::Document(cond) if cond.keys().any(|k| k.starts_with('$')) => {
                cond.iter().all(|(op, arg)| match (op.as_str(), arg) {
                    ("$in", Bson::Array(items)) => {
                        actual.is_some_and(|a| items.iter().any(|i| bson_eq(a, i)))
                    }
                    ("$ne", v) => !actual.is_some_and(|a| bson_eq(a, v)),
                    ("$exists", Bson::Boolean(flag)) => actual.is_some() == *flag,
                    _ => false,
                })
            }
            _ => actual.is_some_and(|a| bson_eq(a, expected)),
        }
    })
}

fn compare_bson(a: Option<&Bson>, b: Option<&Bson>) -> CmpOrdering {
    fn as_f64(v: &Bson) -> Option<f64> {
        match v {
            Bson::Int32(n) => Some(*n as f64),
            Bson::Int64(n) => Some(*n as f64),
            Bson::Double(n) => Some(*n),
            _ => None,
        }
    }
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(x), Some(y)) => match (as_f64(x), as_f64(y)) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(CmpOrdering::Equal),
            _ => match (x, y) {
                (Bson::String(sx), Bson::String(sy)) => sx.cmp(sy),
                _ => x.to_string().cmp(&y.to_string()),
            },
        },
    }
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ord = compare_bson(a.get(field), b.get(field));
            let ord = if bson_as_i64(direction) < 0 { ord.reverse() } else { ord };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        CmpOrdering::Equal
    });
}

fn bson_as_i64(value: &Bson) -> i64 {
    match value {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        Bson::Double(n) => *n as i64,
        _ => 1,
    }
}

fn apply_update(doc: &mut Document, update: &Document) -> DatastoreResult<()> {
    for (op, arg) in update {
        let Bson::Document(fields) = arg else {
            return Err(crate::datastore_error!(
                query,
                format!("更新操作符 {} 的参数必须是文档", op)
            ));
        };
        for (field, value) in fields {
            match op.as_str() {
                "$set" => {
                    doc.insert(field.clone(), value.clone());
                }
                "$unset" => {
                    doc.remove(field);
                }
                "$inc" => {
                    let current = doc.get(field).cloned().unwrap_or(Bson::Int32(0));
                    let next = increment(&current, value).ok_or_else(|| {
                        crate::datastore_error!(
                            query,
                            format!("字段 {} 的值 {} 不能执行 $inc {}", field, current, value)
                        )
                    })?;
                    doc.insert(field.clone(), next);
                }
                _ => {}
            }
        }
    }
    Ok(())
}

/// `$inc` 的数值加法
///
/// Int32 溢出时提升为 Int64；Int64 溢出或类型不是数值时返回 `None`
fn increment(current: &Bson, delta: &Bson) -> Option<Bson> {
    match (current, delta) {
        (Bson::Int32(a), Bson::Int32(b)) => Some(match a.checked_add(*b) {
            Some(n) => Bson::Int32(n),
            None => Bson::Int64(*a as i64 + *b as i64),
        }),
        (Bson::Int32(a), Bson::Int64(b)) => (*a as i64).checked_add(*b).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_add(*b as i64).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64),
        (Bson::Double(a), Bson::Double(b)) => Some(Bson::Double(a + b)),
        (Bson::Double(a), Bson::Int32(b)) => Some(Bson::Double(a + *b as f64)),
        (Bson::Double(a), Bson::Int64(b)) => Some(Bson::Double(a + *b as f64)),
        (Bson::Int32(a), Bson::Double(b)) => Some(Bson::Double(*a as f64 + b)),
        (Bson::Int64(a), Bson::Double(b)) => Some(Bson::Double(*a as f64 + b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, keys};
    use crate::resolver::{PlainTextDecryptor, resolve};

    fn target(servers: &str, db: &str) -> ConnectionTarget {
        let snapshot = ConfigSnapshot::builder().set(keys::MONGO_SERVERS, servers).build();
        resolve(&snapshot, db, &PlainTextDecryptor).unwrap()
    }

    #[tokio::test]
    async fn test_crud_on_memory_store() {
        let connector = MemoryConnector::new();
        let store = connector
            .connect(&target("mongodb://h1", "app"), &PoolTuning::default())
            .await
            .unwrap();

        store
            .insert_many(
                "orders",
                vec![
                    doc! { "sku": "a", "qty": 1 },
                    doc! { "sku": "b", "qty": 5 },
                    doc! { "sku": "c", "qty": 3 },
                ],
            )
            .await
            .unwrap();

        let sorted = store
            .find("orders", doc! {}, FindSpec::page(0, 2).with_sort(doc! { "qty": -1 }))
            .await
            .unwrap();
        assert_eq!(sorted.len(), 2);
        assert_eq!(sorted[0].get_str("sku").unwrap(), "b");

        let updated = store
            .update_many("orders", doc! { "sku": "a" }, doc! { "$inc": { "qty": 2 } })
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(
            store.count("orders", doc! { "qty": 3 }).await.unwrap(),
            2
        );

        let deleted = store
            .delete_many("orders", doc! { "sku": { "$in": ["a", "b"] } })
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("orders", doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hosts_and_databases_are_isolated() {
        let connector = MemoryConnector::new();
        let h1 = connector
            .connect(&target("mongodb://h1", "app"), &PoolTuning::default())
            .await
            .unwrap();
        let h2 = connector
            .connect(&target("mongodb://h2", "app"), &PoolTuning::default())
            .await
            .unwrap();

        h1.insert_one("users", doc! { "name": "x" }).await.unwrap();
        assert_eq!(connector.server("h1").database("app").collection_len("users"), 1);
        assert_eq!(h2.count("users", doc! {}).await.unwrap(), 0);
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_and_closed() {
        let connector = MemoryConnector::new();
        connector.set_unreachable("h9", true);
        let err = connector
            .connect(&target("mongodb://h9", "app"), &PoolTuning::default())
            .await;
        assert!(matches!(err, Err(DatastoreError::ConnectionError { .. })));

        let store = connector
            .connect(&target("mongodb://h1", "app"), &PoolTuning::default())
            .await
            .unwrap();
        assert_eq!(store.run_command(doc! { "ping": 1 }).await.unwrap(), doc! { "ok": 1 });
        store.close().await;
        assert!(matches!(
            store.count("users", doc! {}).await,
            Err(DatastoreError::PoolClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_inc_overflow() {
        let connector = MemoryConnector::new();
        let store = connector
            .connect(&target("mongodb://h1", "app"), &PoolTuning::default())
            .await
            .unwrap();
        store
            .insert_many(
                "counters",
                vec![
                    doc! { "name": "small", "n": i32::MAX },
                    doc! { "name": "big", "n": i64::MAX },
                ],
            )
            .await
            .unwrap();

        // Int32 溢出提升为 Int64
        let updated = store
            .update_many("counters", doc! { "name": "small" }, doc! { "$inc": { "n": 1 } })
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let small = store
            .find("counters", doc! { "name": "small" }, FindSpec::default())
            .await
            .unwrap();
        assert_eq!(small[0].get("n"), Some(&Bson::Int64(i32::MAX as i64 + 1)));

        // Int64 溢出返回查询错误，文档保持不变
        let result = store
            .update_many("counters", doc! { "name": "big" }, doc! { "$inc": { "n": 1 } })
            .await;
        assert!(matches!(result, Err(DatastoreError::QueryError { .. })));
        assert_eq!(
            store.count("counters", doc! { "n": i64::MAX }).await.unwrap(),
            1
        );
    }

    #[test]
    fn test_increment_mixed_types() {
        assert_eq!(increment(&Bson::Int32(2), &Bson::Int64(3)), Some(Bson::Int64(5)));
        assert_eq!(increment(&Bson::Double(1.5), &Bson::Int32(1)), Some(Bson::Double(2.5)));
        assert_eq!(increment(&Bson::Int64(i64::MIN), &Bson::Int32(-1)), None);
        assert_eq!(increment(&Bson::String("x".into()), &Bson::Int32(1)), None);
    }

    #[tokio::test]
    async fn test_aggregate_match_and_limit() {
        let connector = MemoryConnector::new();
        let store = connector
            .connect(&target("mongodb://h1", "app"), &PoolTuning::default())
            .await
            .unwrap();
        for i in 0..5 {
            let kind = if i % 2 == 0 { "even" } else { "odd" };
            store.insert_one("events", doc! { "kind": kind }).await.unwrap();
        }
        let docs = store
            .aggregate(
                "events",
                vec![doc! { "$match": { "kind": "even" } }, doc! { "$limit": 2 }],
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert!(store.aggregate("events", vec![doc! { "$group": {} }]).await.is_err());
    }
}
