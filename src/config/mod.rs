//! # 配置管理模块
//!
//! 配置快照、识别的配置键以及从快照派生的连接池调优参数

pub mod keys;
pub mod snapshot;
pub mod tuning;

// 重新导出所有公共类型
pub use snapshot::{ConfigSnapshot, ConfigSnapshotBuilder};
pub use tuning::{MappingOptions, PoolTuning, ReadPreferenceMode};
