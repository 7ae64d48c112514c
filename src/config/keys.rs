//! 识别的配置键

/// 基础连接串，必填
pub const MONGO_SERVERS: &str = "mongo.servers";
/// 首选的默认逻辑库名
pub const MONGO_DB_NAME: &str = "mongo.dbName";
/// 用户名
pub const USERNAME: &str = "username";
/// 密码
pub const PASSWORD: &str = "password";
/// 密码是否为密文
pub const ENCRYPT: &str = "encrypt";
/// 密码是否为密文（别名）
pub const ENCRYPT_PWD: &str = "encrypt.pwd";
/// 信任库名，等于 `admin` 时强制 `authSource=admin`
pub const TRUST_DB_NAME: &str = "trust.dbName";
/// `trust.dbName` 缺省时的回退键
pub const AUTH_SOURCE: &str = "authSource";

pub const READ_PREFERENCE: &str = "mongo.readPreference";
pub const SERVER_SELECTION_TIMEOUT: &str = "mongo.serverSelectionTimeout";
pub const MAX_WAIT_TIME: &str = "mongo.maxWaitTime";
pub const MAX_CONNECTION_LIFE_TIME: &str = "mongo.maxConnectionLifeTime";
pub const MAX_CONNECTION_IDLE_TIME: &str = "mongo.maxConnectionIdleTime";
pub const MAX_CONNECTIONS_PER_HOST: &str = "mongo.maxConnectionsPerHost";
pub const CONNECT_TIMEOUT: &str = "mongo.connectTimeout";
pub const SOCKET_TIMEOUT: &str = "mongo.socketTimeout";
pub const STORE_EMPTIES: &str = "mongo.storeEmpties";
pub const STORE_NULLS: &str = "mongo.storeNulls";
pub const MAP_PACKAGE: &str = "mongo.mapPackage";
pub const IGNORE_INVALID_CLASSES: &str = "mongo.ignoreInvalidClasses";

/// 管理库名称
pub const ADMIN_DB: &str = "admin";
