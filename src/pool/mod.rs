//! 连接池模块
//!
//! 连接池绑定一个已解析的连接目标和一个命名模板，
//! 底层存储通过 `PoolConnector` 注入：生产环境用 MongoDB 驱动，
//! 内存存储需启用 `memory-store` 特性（crate 自身的单元测试始终可用）

pub mod builder;
#[cfg(any(test, feature = "memory-store"))]
pub mod memory;
pub mod mongo;
pub mod pool;
pub mod store;

pub use builder::{PoolBuilder, PoolConnector};
#[cfg(any(test, feature = "memory-store"))]
pub use memory::{MemoryConnector, MemoryDatabase, MemoryServer, MemoryStore};
pub use mongo::{MongoConnector, MongoStore};
pub use pool::{MappingContext, Pool};
pub use store::{DocumentStore, FindSpec};
