//! MongoDB 连接串的拆分与重组
//!
//! 只处理解析器需要改写的部分：凭据、库名段与查询参数，主机列表原样保留

use crate::error::DatastoreResult;
use once_cell::sync::Lazy;
use regex::Regex;

static MONGO_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<scheme>mongodb(?:\+srv)?)://(?:(?P<creds>[^@/?]*)@)?(?P<hosts>[^/?]*)(?:/(?P<db>[^?]*))?(?:\?(?P<query>.*))?$",
    )
    .expect("内置连接串正则无效")
});

/// 拆分后的连接串
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoint {
    pub scheme: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub hosts: String,
    pub database: Option<String>,
    pub options: Vec<(String, String)>,
}

impl Endpoint {
    /// 解析连接串，缺少协议或主机时报配置错误
    pub fn parse(raw: &str) -> DatastoreResult<Self> {
        let raw = raw.trim();
        let caps = MONGO_URI.captures(raw).ok_or_else(|| {
            crate::datastore_error!(
                config,
                format!("连接串格式错误，需以 mongodb:// 或 mongodb+srv:// 开头: {}", raw)
            )
        })?;

        let hosts = caps.name("hosts").map(|m| m.as_str()).unwrap_or_default();
        if hosts.is_empty() || hosts.split(',').any(|h| h.trim().is_empty()) {
            return Err(crate::datastore_error!(
                config,
                format!("连接串缺少主机: {}", raw)
            ));
        }

        let (username, password) = match caps.name("creds").map(|m| m.as_str()) {
            Some(creds) => match creds.split_once(':') {
                Some((user, pass)) => (
                    Some(user.to_string()),
                    Some(pass.to_string()).filter(|p| !p.is_empty()),
                ),
                None => (Some(creds.to_string()), None),
            },
            None => (None, None),
        };

        let database = caps
            .name("db")
            .map(|m| m.as_str().trim_matches('/'))
            .filter(|db| !db.is_empty())
            .map(str::to_string);

        let options = caps
            .name("query")
            .map(|m| {
                m.as_str()
                    .split('&')
                    .filter(|pair| !pair.is_empty())
                    .map(|pair| match pair.split_once('=') {
                        Some((k, v)) => (k.to_string(), v.to_string()),
                        None => (pair.to_string(), String::new()),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            scheme: caps["scheme"].to_string(),
            username: username.filter(|u| !u.is_empty()),
            password,
            hosts: hosts.to_string(),
            database,
            options,
        })
    }

    /// 读取查询参数（键名大小写不敏感）
    pub fn option(&self, key: &str) -> Option<&str> {
        self.options
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// 设置查询参数，已存在的同名参数全部被替换为一个
    pub fn set_option(&mut self, key: &str, value: &str) {
        self.options.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
        self.options.push((key.to_string(), value.to_string()));
    }

    /// 主机列表
    pub fn host_list(&self) -> Vec<String> {
        self.hosts.split(',').map(|h| h.trim().to_string()).collect()
    }

    /// 重组连接串，`mask_password` 为 true 时密码替换为 `****`
    pub fn render(&self, mask_password: bool) -> String {
        let mut uri = format!("{}://", self.scheme);

        if let Some(user) = &self.username {
            uri.push_str(user);
            if let Some(pass) = &self.password {
                uri.push(':');
                uri.push_str(if mask_password { "****" } else { pass });
            }
            uri.push('@');
        }

        uri.push_str(&self.hosts);

        if self.database.is_some() || !self.options.is_empty() {
            uri.push('/');
        }
        if let Some(db) = &self.database {
            uri.push_str(db);
        }

        if !self.options.is_empty() {
            let query = self
                .options
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("&");
            uri.push('?');
            uri.push_str(&query);
        }

        uri
    }
}
