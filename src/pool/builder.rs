//! 连接池构建器

use async_trait::async_trait;
use rat_logger::{debug, info};
use std::sync::Arc;

use super::pool::{MappingContext, Pool};
use super::store::DocumentStore;
use crate::config::PoolTuning;
use crate::error::DatastoreResult;
use crate::naming::NamingTemplate;
use crate::resolver::ConnectionTarget;

/// 连接器trait，负责为连接目标建立底层连接
#[async_trait]
pub trait PoolConnector: Send + Sync {
    /// 建立连接并完成握手；目标不可达时返回连接错误
    async fn connect(
        &self,
        target: &ConnectionTarget,
        tuning: &PoolTuning,
    ) -> DatastoreResult<Arc<dyn DocumentStore>>;
}

/// 连接池构建器
#[derive(Clone)]
pub struct PoolBuilder {
    connector: Arc<dyn PoolConnector>,
}

impl PoolBuilder {
    pub fn new(connector: Arc<dyn PoolConnector>) -> Self {
        Self { connector }
    }

    /// 构建连接池
    ///
    /// 每次调用都会建立新的底层连接，不复用任何已有连接池
    pub async fn build(
        &self,
        target: ConnectionTarget,
        template: Option<NamingTemplate>,
        tuning: &PoolTuning,
    ) -> DatastoreResult<Pool> {
        if target.database().is_none() {
            return Err(crate::datastore_error!(
                config,
                format!("连接目标未指定数据库: {}", target)
            ));
        }

        debug!(
            "构建连接池: 目标={}, 模板={:?}, 读偏好={}",
            target,
            template.as_ref().map(NamingTemplate::pattern),
            tuning.read_preference
        );

        let store = self.connector.connect(&target, tuning).await?;
        let mapping = MappingContext::new(template, tuning.mapping.clone());
        let pool = Pool::new(target, mapping, store);

        info!("连接池创建成功: id={}, 库={}", pool.id(), pool.database_name());
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSnapshot, keys};
    use crate::error::DatastoreError;
    use crate::pool::MemoryConnector;
    use crate::resolver::{PlainTextDecryptor, resolve};
    use mongodb::bson::doc;

    fn target(db: &str) -> ConnectionTarget {
        let snapshot = ConfigSnapshot::builder()
            .set(keys::MONGO_SERVERS, "mongodb://h1")
            .build();
        resolve(&snapshot, db, &PlainTextDecryptor).unwrap()
    }

    #[tokio::test]
    async fn test_build_binds_template_and_database() {
        let connector = Arc::new(MemoryConnector::new());
        let builder = PoolBuilder::new(connector.clone());
        let pool = builder
            .build(
                target("app"),
                Some(NamingTemplate::prefixed("2019").unwrap()),
                &PoolTuning::default(),
            )
            .await
            .unwrap();

        assert_eq!(pool.database_name(), "app");
        pool.insert_one("orders", doc! { "n": 1 }).await.unwrap();
        assert_eq!(
            connector.server("h1").database("app").collection_len("2019_orders"),
            1
        );
    }

    #[tokio::test]
    async fn test_build_each_call_is_fresh() {
        let connector = Arc::new(MemoryConnector::new());
        let builder = PoolBuilder::new(connector.clone());
        let a = builder.build(target("app"), None, &PoolTuning::default()).await.unwrap();
        let b = builder.build(target("app"), None, &PoolTuning::default()).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_build_requires_database() {
        let builder = PoolBuilder::new(Arc::new(MemoryConnector::new()));
        let result = builder.build(target(""), None, &PoolTuning::default()).await;
        assert!(matches!(result, Err(DatastoreError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn test_build_unreachable() {
        let connector = Arc::new(MemoryConnector::new());
        connector.set_unreachable("h1", true);
        let builder = PoolBuilder::new(connector);
        let result = builder.build(target("app"), None, &PoolTuning::default()).await;
        assert!(matches!(result, Err(DatastoreError::ConnectionError { .. })));
    }
}
