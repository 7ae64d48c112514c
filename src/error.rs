//! 错误类型定义
//!
//! 注册表、解析器、连接池与DAO共用的错误枚举

use thiserror::Error;

/// 数据源错误
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// 配置缺失或格式错误（包括密码解密失败）
    #[error("{}", crate::i18n::tf("error.config", &[("message", .message.as_str())]))]
    ConfigError { message: String },

    /// 连接池创建或握手失败
    #[error("{}", crate::i18n::tf("error.connection", &[("message", .message.as_str())]))]
    ConnectionError { message: String },

    /// 查询执行失败
    #[error("{}", crate::i18n::tf("error.query", &[("message", .message.as_str())]))]
    QueryError { message: String },

    /// 期望最多一条结果，实际命中多条
    #[error("{}", crate::i18n::tf("error.multiple_results", &[("collection", .collection.as_str()), ("count", .count.to_string().as_str())]))]
    MultipleResults { collection: String, count: usize },

    /// 注册表中不存在该键
    #[error("{}", crate::i18n::tf("error.key_not_found", &[("key", .key.as_str())]))]
    KeyNotFound { key: String },

    /// 尚未加载任何配置
    #[error("{}", crate::i18n::t("error.not_initialized"))]
    NotInitialized,

    /// 连接池已被关闭
    #[error("{}", crate::i18n::tf("error.pool_closed", &[("database", .database.as_str())]))]
    PoolClosed { database: String },

    /// 序列化/反序列化失败
    #[error("{}", crate::i18n::tf("error.serialization", &[("message", .message.as_str())]))]
    SerializationError { message: String },

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),
}

/// 结果类型别名
pub type DatastoreResult<T> = Result<T, DatastoreError>;

/// 密码解密失败
///
/// 由外部解密器返回，解析器将其包装为 [`DatastoreError::ConfigError`]
#[derive(Error, Debug, Clone)]
#[error("密码解密失败: {message}")]
pub struct DecryptError {
    pub message: String,
}

impl From<DecryptError> for DatastoreError {
    fn from(e: DecryptError) -> Self {
        DatastoreError::ConfigError {
            message: e.to_string(),
        }
    }
}

impl From<mongodb::error::Error> for DatastoreError {
    fn from(e: mongodb::error::Error) -> Self {
        DatastoreError::QueryError {
            message: e.to_string(),
        }
    }
}

impl From<mongodb::bson::ser::Error> for DatastoreError {
    fn from(e: mongodb::bson::ser::Error) -> Self {
        DatastoreError::SerializationError {
            message: e.to_string(),
        }
    }
}

impl From<mongodb::bson::de::Error> for DatastoreError {
    fn from(e: mongodb::bson::de::Error) -> Self {
        DatastoreError::SerializationError {
            message: e.to_string(),
        }
    }
}

/// 快速构造错误的宏
#[macro_export]
macro_rules! datastore_error {
    (config, $msg:expr) => {
        $crate::error::DatastoreError::ConfigError {
            message: $msg.to_string(),
        }
    };
    (connection, $msg:expr) => {
        $crate::error::DatastoreError::ConnectionError {
            message: $msg.to_string(),
        }
    };
    (query, $msg:expr) => {
        $crate::error::DatastoreError::QueryError {
            message: $msg.to_string(),
        }
    };
    (serialization, $msg:expr) => {
        $crate::error::DatastoreError::SerializationError {
            message: $msg.to_string(),
        }
    };
    (key_not_found, $key:expr) => {
        $crate::error::DatastoreError::KeyNotFound {
            key: $key.to_string(),
        }
    };
}
