//! 连接目标解析
//!
//! 根据配置快照和逻辑库名计算带凭据、带认证库的最终连接串。
//! 解析是纯函数（除注入的解密器外），每次加载/重载都会生成新的目标。

mod decrypt;
mod endpoint;

pub use decrypt::{PasswordDecryptor, PlainTextDecryptor};

use crate::config::{keys, ConfigSnapshot};
use crate::error::DatastoreResult;
use endpoint::Endpoint;
use rat_logger::warn;
use serde::Serialize;
use std::fmt;

/// 已解析的连接目标，创建后不可变
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTarget {
    #[serde(skip)]
    uri: String,
    redacted: String,
    scheme: String,
    hosts: Vec<String>,
    database: Option<String>,
    username: Option<String>,
    auth_source: Option<String>,
    options: Vec<(String, String)>,
}

impl ConnectionTarget {
    fn from_endpoint(ep: &Endpoint) -> Self {
        Self {
            uri: ep.render(false),
            redacted: ep.render(true),
            scheme: ep.scheme.clone(),
            hosts: ep.host_list(),
            database: ep.database.clone(),
            username: ep
                .username
                .as_deref()
                .map(|u| urlencoding::decode(u).map(|s| s.into_owned()).unwrap_or_else(|_| u.to_string())),
            auth_source: ep.option("authSource").map(str::to_string),
            options: ep.options.clone(),
        }
    }

    /// 完整连接串（含明文密码），仅交给驱动使用
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// 密码已打码的连接串，用于日志
    pub fn redacted_uri(&self) -> &str {
        &self.redacted
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// 主机列表的规范形式，用作同一集群的标识
    pub fn host_key(&self) -> String {
        self.hosts.join(",")
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn auth_source(&self) -> Option<&str> {
        self.auth_source.as_deref()
    }

    pub fn options(&self) -> &[(String, String)] {
        &self.options
    }

    /// 读取查询参数（键名大小写不敏感）
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

// 只输出打码后的连接串，避免密码进入日志
impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("uri", &self.redacted)
            .field("database", &self.database)
            .field("auth_source", &self.auth_source)
            .finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted)
    }
}

/// 解析连接目标
///
/// # 参数
/// * `snapshot` - 当前配置快照
/// * `db_name` - 要连接的逻辑库名
/// * `decryptor` - 密码解密器，仅在 `encrypt`/`encrypt.pwd` 开启时使用
///
/// # 返回值
/// 恰好指向一个库、凭据与认证库无歧义的连接目标；
/// 连接串缺少协议或主机、解密失败时返回配置错误
pub fn resolve(
    snapshot: &ConfigSnapshot,
    db_name: &str,
    decryptor: &dyn PasswordDecryptor,
) -> DatastoreResult<ConnectionTarget> {
    let servers = snapshot.get(keys::MONGO_SERVERS).ok_or_else(|| {
        crate::datastore_error!(config, format!("缺少必填配置项 {}", keys::MONGO_SERVERS))
    })?;
    let mut ep = Endpoint::parse(servers)?;

    // 配置的库名和要使用的不一致时切换库名段
    let db_name = db_name.trim().trim_matches('/');
    if !db_name.is_empty() {
        ep.database = Some(db_name.to_string());
    }

    if let Some(username) = snapshot.get(keys::USERNAME) {
        if ep.username.is_some() {
            warn!("mongo.servers 已包含凭据，将被 username/password 配置覆盖");
        }
        ep.username = Some(urlencoding::encode(username).into_owned());
        ep.password = snapshot
            .get(keys::PASSWORD)
            .map(|p| urlencoding::encode(p).into_owned());
    }

    if snapshot.get_bool(keys::ENCRYPT_PWD) || snapshot.get_bool(keys::ENCRYPT) {
        if let Some(cipher) = ep.password.take() {
            let cipher = urlencoding::decode(&cipher)
                .map(|s| s.into_owned())
                .unwrap_or(cipher);
            let plain = decryptor.decrypt(&cipher)?;
            ep.password = Some(urlencoding::encode(&plain).into_owned()).filter(|p| !p.is_empty());
        }
    }

    let trust_db = snapshot
        .get(keys::TRUST_DB_NAME)
        .or_else(|| snapshot.get(keys::AUTH_SOURCE));
    if trust_db == Some(keys::ADMIN_DB) {
        // 驱动底层部分认证机制只接受 admin 作为认证库
        ep.set_option("authSource", keys::ADMIN_DB);
    } else if ep.database.is_none() {
        ep.database = snapshot.get(keys::MONGO_DB_NAME).map(str::to_string);
    }

    Ok(ConnectionTarget::from_endpoint(&ep))
}

/// 首次加载时的默认逻辑库名
///
/// 依次取 `mongo.dbName`、`mongo.servers` 中的库名段，最后回退为 `admin`
pub fn initial_database_name(snapshot: &ConfigSnapshot) -> DatastoreResult<String> {
    if let Some(db) = snapshot.get(keys::MONGO_DB_NAME) {
        return Ok(db.to_string());
    }
    let servers = snapshot.get(keys::MONGO_SERVERS).ok_or_else(|| {
        crate::datastore_error!(config, format!("缺少必填配置项 {}", keys::MONGO_SERVERS))
    })?;
    Ok(Endpoint::parse(servers)?
        .database
        .unwrap_or_else(|| keys::ADMIN_DB.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DatastoreError, DecryptError};

    fn snapshot(pairs: &[(&str, &str)]) -> ConfigSnapshot {
        ConfigSnapshot::from_pairs(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn test_database_segment_is_rewritten_without_double_slash() {
        for base in [
            "mongodb://h1:27017",
            "mongodb://h1:27017/",
            "mongodb://h1:27017/app",
            "mongodb://h1:27017/orders",
        ] {
            let target = resolve(
                &snapshot(&[(keys::MONGO_SERVERS, base)]),
                "orders",
                &PlainTextDecryptor,
            )
            .unwrap();
            assert_eq!(target.uri(), "mongodb://h1:27017/orders", "base = {}", base);
            assert_eq!(target.uri().matches('/').count(), 3);
            assert_eq!(target.database(), Some("orders"));
        }
    }

    #[test]
    fn test_query_string_is_preserved_when_switching_database() {
        let target = resolve(
            &snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1,h2/app?replicaSet=rs0")]),
            "billing",
            &PlainTextDecryptor,
        )
        .unwrap();
        assert_eq!(target.uri(), "mongodb://h1,h2/billing?replicaSet=rs0");
        assert_eq!(target.hosts(), &["h1".to_string(), "h2".to_string()]);
    }

    #[test]
    fn test_username_without_password_has_no_colon() {
        let target = resolve(
            &snapshot(&[
                (keys::MONGO_SERVERS, "mongodb://h1/app"),
                (keys::USERNAME, "reader"),
                (keys::PASSWORD, ""),
            ]),
            "app",
            &PlainTextDecryptor,
        )
        .unwrap();
        assert_eq!(target.uri(), "mongodb://reader@h1/app");
        assert!(!target.uri().contains("reader:@"));
        assert_eq!(target.username(), Some("reader"));
    }

    #[test]
    fn test_configured_credentials_replace_embedded_ones() {
        let target = resolve(
            &snapshot(&[
                (keys::MONGO_SERVERS, "mongodb://old:pw@h1/app"),
                (keys::USERNAME, "svc"),
                (keys::PASSWORD, "p@ss"),
            ]),
            "app",
            &PlainTextDecryptor,
        )
        .unwrap();
        assert_eq!(target.uri(), "mongodb://svc:p%40ss@h1/app");
        assert_eq!(target.redacted_uri(), "mongodb://svc:****@h1/app");
        assert!(!format!("{:?}", target).contains("p%40ss"));
    }

    #[test]
    fn test_admin_trust_db_adds_auth_source_once() {
        for (base, expected) in [
            ("mongodb://h1/app", "mongodb://h1/app?authSource=admin"),
            (
                "mongodb://h1/app?replicaSet=rs0",
                "mongodb://h1/app?replicaSet=rs0&authSource=admin",
            ),
            (
                "mongodb://h1/app?authSource=app&w=1",
                "mongodb://h1/app?w=1&authSource=admin",
            ),
        ] {
            let target = resolve(
                &snapshot(&[(keys::MONGO_SERVERS, base), (keys::TRUST_DB_NAME, "admin")]),
                "app",
                &PlainTextDecryptor,
            )
            .unwrap();
            assert_eq!(target.uri(), expected);
            assert_eq!(target.uri().matches("authSource=admin").count(), 1);
            assert_eq!(target.auth_source(), Some("admin"));
        }
    }

    #[test]
    fn test_auth_source_key_is_trust_fallback() {
        let target = resolve(
            &snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1/app"), (keys::AUTH_SOURCE, "admin")]),
            "app",
            &PlainTextDecryptor,
        )
        .unwrap();
        assert_eq!(target.auth_source(), Some("admin"));

        let untouched = resolve(
            &snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1/app"), (keys::TRUST_DB_NAME, "app")]),
            "app",
            &PlainTextDecryptor,
        )
        .unwrap();
        assert_eq!(untouched.auth_source(), None);
        assert_eq!(untouched.uri(), "mongodb://h1/app");
    }

    #[test]
    fn test_empty_logical_name_falls_back_to_configured_db() {
        let target = resolve(
            &snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1/"), (keys::MONGO_DB_NAME, "core")]),
            "",
            &PlainTextDecryptor,
        )
        .unwrap();
        assert_eq!(target.uri(), "mongodb://h1/core");
    }

    #[test]
    fn test_encrypted_password_goes_through_decryptor() {
        let decryptor = |cipher: &str| -> Result<String, DecryptError> {
            Ok(cipher.chars().rev().collect())
        };
        let target = resolve(
            &snapshot(&[
                (keys::MONGO_SERVERS, "mongodb://h1/app"),
                (keys::USERNAME, "svc"),
                (keys::PASSWORD, "terces"),
                (keys::ENCRYPT, "true"),
            ]),
            "app",
            &decryptor,
        )
        .unwrap();
        assert_eq!(target.uri(), "mongodb://svc:secret@h1/app");
    }

    #[test]
    fn test_decrypt_failure_is_config_error() {
        let decryptor = |_: &str| -> Result<String, DecryptError> {
            Err(DecryptError {
                message: "密钥不匹配".to_string(),
            })
        };
        let result = resolve(
            &snapshot(&[
                (keys::MONGO_SERVERS, "mongodb://svc:x@h1/app"),
                (keys::ENCRYPT_PWD, "true"),
            ]),
            "app",
            &decryptor,
        );
        assert!(matches!(result, Err(DatastoreError::ConfigError { .. })));
    }

    #[test]
    fn test_malformed_or_missing_servers() {
        let missing = resolve(&ConfigSnapshot::new(), "app", &PlainTextDecryptor);
        assert!(matches!(missing, Err(DatastoreError::ConfigError { .. })));

        let no_scheme = resolve(
            &snapshot(&[(keys::MONGO_SERVERS, "h1:27017/app")]),
            "app",
            &PlainTextDecryptor,
        );
        assert!(matches!(no_scheme, Err(DatastoreError::ConfigError { .. })));
    }

    #[test]
    fn test_initial_database_name_precedence() {
        let explicit = snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1/app"), (keys::MONGO_DB_NAME, "core")]);
        assert_eq!(initial_database_name(&explicit).unwrap(), "core");

        let from_uri = snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1/app")]);
        assert_eq!(initial_database_name(&from_uri).unwrap(), "app");

        let fallback = snapshot(&[(keys::MONGO_SERVERS, "mongodb://h1")]);
        assert_eq!(initial_database_name(&fallback).unwrap(), "admin");
    }
}
