//! MongoDB 驱动连接

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Bson, Document, doc};
use mongodb::options::{ClientOptions, FindOptions};
use mongodb::{Client, Database};
use rat_logger::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::builder::PoolConnector;
use super::store::{DocumentStore, FindSpec};
use crate::config::PoolTuning;
use crate::error::{DatastoreError, DatastoreResult};
use crate::resolver::ConnectionTarget;

/// MongoDB 连接器
#[derive(Debug, Default, Clone)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }

    /// 读偏好通过连接串传给驱动，连接串已指定时以连接串为准
    fn uri_with_read_preference(target: &ConnectionTarget, tuning: &PoolTuning) -> String {
        let uri = target.uri();
        if target.option("readPreference").is_some() {
            return uri.to_string();
        }
        let param = format!("readPreference={}", tuning.read_preference.as_uri_value());
        if uri.contains('?') {
            format!("{}&{}", uri, param)
        } else if target.database().is_some() {
            format!("{}?{}", uri, param)
        } else {
            format!("{}/?{}", uri, param)
        }
    }
}

#[async_trait]
impl PoolConnector for MongoConnector {
    async fn connect(
        &self,
        target: &ConnectionTarget,
        tuning: &PoolTuning,
    ) -> DatastoreResult<Arc<dyn DocumentStore>> {
        let database_name = target.database().ok_or_else(|| {
            crate::datastore_error!(config, format!("连接目标未指定数据库: {}", target))
        })?;

        let uri = Self::uri_with_read_preference(target, tuning);
        let mut options = ClientOptions::parse(&uri).await.map_err(|e| {
            crate::datastore_error!(config, format!("连接串解析失败 ({}): {}", target, e))
        })?;

        options.max_pool_size = Some(tuning.max_connections_per_host);
        options.server_selection_timeout = Some(tuning.server_selection_timeout);
        options.connect_timeout = Some(tuning.connect_timeout);
        options.max_idle_time = Some(tuning.max_connection_idle_time);
        if let Some(app_name) = &tuning.app_name {
            options.app_name = Some(app_name.clone());
        }
        debug!(
            "驱动未提供的参数将被忽略: socketTimeout={:?}, maxWaitTime={:?}, maxConnectionLifeTime={:?}",
            tuning.socket_timeout, tuning.max_wait_time, tuning.max_connection_life_time
        );

        let client = Client::with_options(options).map_err(|e| {
            crate::datastore_error!(connection, format!("MongoDB连接失败 ({}): {}", target, e))
        })?;
        let database = client.database(database_name);

        // 握手确认服务器可达
        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                crate::datastore_error!(connection, format!("MongoDB握手失败 ({}): {}", target, e))
            })?;

        info!("MongoDB连接成功: {}", target);
        Ok(Arc::new(MongoStore {
            client,
            database,
            closed: AtomicBool::new(false),
        }))
    }
}

/// 基于官方驱动的文档存储
#[derive(Debug)]
pub struct MongoStore {
    client: Client,
    database: Database,
    closed: AtomicBool,
}

impl MongoStore {
    fn collection(&self, name: &str) -> DatastoreResult<mongodb::Collection<Document>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatastoreError::PoolClosed {
                database: self.database.name().to_string(),
            });
        }
        Ok(self.database.collection::<Document>(name))
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database_name(&self) -> &str {
        self.database.name()
    }

    async fn insert_one(&self, collection: &str, doc: Document) -> DatastoreResult<Bson> {
        let result = self.collection(collection)?.insert_one(doc, None).await?;
        Ok(result.inserted_id)
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> DatastoreResult<Vec<Bson>> {
        let result = self.collection(collection)?.insert_many(docs, None).await?;
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids.into_iter().map(|(_, id)| id).collect())
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        spec: FindSpec,
    ) -> DatastoreResult<Vec<Document>> {
        let mut options = FindOptions::default();
        options.skip = spec.skip;
        options.limit = spec.limit;
        options.sort = spec.sort;

        let cursor = self
            .collection(collection)?
            .find(filter, options)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn count(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        Ok(self
            .collection(collection)?
            .count_documents(filter, None)
            .await?)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> DatastoreResult<u64> {
        let result = self
            .collection(collection)?
            .update_many(filter, update, None)
            .await?;
        Ok(result.modified_count)
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> DatastoreResult<u64> {
        let result = self
            .collection(collection)?
            .delete_many(filter, None)
            .await?;
        Ok(result.deleted_count)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> DatastoreResult<Vec<Document>> {
        let cursor = self
            .collection(collection)?
            .aggregate(pipeline, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn run_command(&self, command: Document) -> DatastoreResult<Document> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatastoreError::PoolClosed {
                database: self.database.name().to_string(),
            });
        }
        Ok(self.database.run_command(command, None).await?)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // shutdown 会等待仍在使用的游标和会话归还
        self.client.clone().shutdown().await;
        debug!("MongoDB客户端已关闭: 库={}", self.database.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, ReadPreferenceMode, keys};
    use crate::resolver::{PlainTextDecryptor, resolve};

    fn target(servers: &str, db: &str) -> ConnectionTarget {
        let snapshot = ConfigSnapshot::builder().set(keys::MONGO_SERVERS, servers).build();
        resolve(&snapshot, db, &PlainTextDecryptor).unwrap()
    }

    #[test]
    fn test_read_preference_appended() {
        let tuning = PoolTuning {
            read_preference: ReadPreferenceMode::SecondaryPreferred,
            ..Default::default()
        };
        assert_eq!(
            MongoConnector::uri_with_read_preference(&target("mongodb://h1", "app"), &tuning),
            "mongodb://h1/app?readPreference=secondaryPreferred"
        );
        assert_eq!(
            MongoConnector::uri_with_read_preference(
                &target("mongodb://h1/x?w=1", "app"),
                &tuning
            ),
            "mongodb://h1/app?w=1&readPreference=secondaryPreferred"
        );
    }

    #[test]
    fn test_read_preference_in_uri_wins() {
        let uri = MongoConnector::uri_with_read_preference(
            &target("mongodb://h1/app?readPreference=nearest", "app"),
            &PoolTuning::default(),
        );
        assert_eq!(uri, "mongodb://h1/app?readPreference=nearest");
    }
}
