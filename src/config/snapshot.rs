//! # 配置快照
//!
//! 外部配置源每次推送的都是一份完整、不可变的键值快照。
//! 嵌套的 TOML/JSON 表会被展开为点号分隔的键，例如
//! `[mongo] servers = "..."` 等价于 `"mongo.servers" = "..."`。

use crate::error::{DatastoreError, DatastoreResult};
use rat_logger::info;
use std::collections::HashMap;
use std::path::Path;

/// 不可变的配置快照
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    values: HashMap<String, String>,
}

impl ConfigSnapshot {
    /// 创建空快照
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建快照构建器
    pub fn builder() -> ConfigSnapshotBuilder {
        ConfigSnapshotBuilder::default()
    }

    /// 从键值对创建快照
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// 从 TOML 文本解析
    pub fn from_toml_str(content: &str) -> DatastoreResult<Self> {
        let value: toml::Value = toml::from_str(content)
            .map_err(|e| crate::datastore_error!(config, format!("解析TOML配置失败: {}", e)))?;
        let mut values = HashMap::new();
        flatten_toml(None, &value, &mut values);
        Ok(Self { values })
    }

    /// 从 JSON 文本解析
    pub fn from_json_str(content: &str) -> DatastoreResult<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| crate::datastore_error!(config, format!("解析JSON配置失败: {}", e)))?;
        if !value.is_object() {
            return Err(crate::datastore_error!(config, "JSON配置顶层必须是对象"));
        }
        let mut values = HashMap::new();
        flatten_json(None, &value, &mut values);
        Ok(Self { values })
    }

    /// 从 `key=value` 形式的属性文本解析，`#` 与 `!` 开头的行为注释
    pub fn from_properties_str(content: &str) -> DatastoreResult<Self> {
        let mut values = HashMap::new();
        for (line_no, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .or_else(|| line.split_once(':'))
                .ok_or_else(|| {
                    crate::datastore_error!(
                        config,
                        format!("属性配置第 {} 行缺少分隔符: {}", line_no + 1, line)
                    )
                })?;
            values.insert(key.trim().to_string(), value.trim().to_string());
        }
        Ok(Self { values })
    }

    /// 从文件加载，按扩展名选择格式（toml / json / 其余按属性文件处理）
    pub fn from_file<P: AsRef<Path>>(path: P) -> DatastoreResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(DatastoreError::IoError)?;

        let snapshot = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::from_properties_str(&content)?,
        };

        info!("从文件加载数据源配置: {:?}, 共 {} 项", path, snapshot.len());
        Ok(snapshot)
    }

    /// 读取字符串值，空字符串视为未配置
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// 读取字符串值，缺省时返回默认值
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// 读取布尔值，缺省或无法识别时为 false
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(
            self.get(key).map(|v| v.trim().to_ascii_lowercase()).as_deref(),
            Some("true") | Some("1") | Some("yes") | Some("on")
        )
    }

    /// 读取无符号整数，缺省时返回默认值，格式错误时报配置错误
    pub fn get_u64_or(&self, key: &str, default: u64) -> DatastoreResult<u64> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                crate::datastore_error!(config, format!("配置项 {} 不是合法的整数: {}", key, raw))
            }),
        }
    }

    /// 是否包含该键（包括空值）
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// 配置项数量
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 遍历所有配置项
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// 配置快照构建器
#[derive(Debug, Default)]
pub struct ConfigSnapshotBuilder {
    values: HashMap<String, String>,
}

impl ConfigSnapshotBuilder {
    /// 设置配置项
    pub fn set<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.values.insert(key.into(), value.to_string());
        self
    }

    /// 构建快照
    pub fn build(self) -> ConfigSnapshot {
        ConfigSnapshot {
            values: self.values,
        }
    }
}

fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(p) => format!("{}.{}", p, key),
        None => key.to_string(),
    }
}

fn flatten_toml(prefix: Option<&str>, value: &toml::Value, out: &mut HashMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (k, v) in table {
                let key = join_key(prefix, k);
                flatten_toml(Some(&key), v, out);
            }
        }
        other => {
            if let Some(p) = prefix {
                out.insert(p.to_string(), toml_scalar(other));
            }
        }
    }
}

fn toml_scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items
            .iter()
            .map(toml_scalar)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

fn flatten_json(
    prefix: Option<&str>,
    value: &serde_json::Value,
    out: &mut HashMap<String, String>,
) {
    match value {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = join_key(prefix, k);
                flatten_json(Some(&key), v, out);
            }
        }
        other => {
            if let Some(p) = prefix {
                out.insert(p.to_string(), json_scalar(other));
            }
        }
    }
}

fn json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(json_scalar)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}
