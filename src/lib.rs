//! rat_datastore - 可热更新的 MongoDB 数据源注册表
//!
//! 按逻辑库名和集合命名模板缓存连接池，配置变更时重新解析连接目标、
//! 原子替换在用连接池，并在宽限期后关闭旧连接池。
//! 调用者持有的数据源句柄在重载前后保持有效。

pub mod config;
pub mod dao;
pub mod error;
pub mod i18n;
pub mod naming;
pub mod pool;
pub mod registry;
pub mod resolver;

// 重新导出常用类型和函数
pub use config::{ConfigSnapshot, ConfigSnapshotBuilder, MappingOptions, PoolTuning, ReadPreferenceMode};
pub use dao::{BaseDao, example_filter};
pub use error::{DatastoreError, DatastoreResult, DecryptError};
pub use naming::{NamingTemplate, apply_template};
pub use pool::{DocumentStore, FindSpec, MongoConnector, Pool, PoolBuilder, PoolConnector};
#[cfg(feature = "memory-store")]
pub use pool::MemoryConnector;
pub use registry::{
    DEFAULT_GRACE_PERIOD, Datastore, DatastoreRegistry, RegistryBuilder, RegistryKey,
    ReloadReport, ReloadState, global_registry,
};
pub use resolver::{ConnectionTarget, PasswordDecryptor, PlainTextDecryptor, resolve};

// 重新导出驱动的 BSON 类型
pub use mongodb::bson;

// 条件编译调试宏 - 只有在 debug 模式下才输出调试信息
#[cfg(debug_assertions)]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        rat_logger::debug!($($arg)*);
    };
}

#[cfg(not(debug_assertions))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        // 在 release 模式下不输出调试信息
    };
}

/// 初始化rat_datastore库
///
/// 注册多语言错误消息并按环境变量选择语言。
///
/// 注意：日志系统由调用者自行初始化，本库不会自动初始化日志
pub fn init() {
    i18n::ErrorMessageI18n::init();
}

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 库名称
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 获取库信息
pub fn get_info() -> String {
    format!("{} v{}", NAME, VERSION)
}
