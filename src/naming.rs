//! 集合命名模板
//!
//! 支持设定集合名的前后缀，比如 `2019_%s`、`%s_2019`，
//! 同一实体类型可以按部署分区（通常是年份）落到不同的集合

use crate::error::DatastoreResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 模板中的占位符
pub const PLACEHOLDER: &str = "%s";

/// 单占位符的集合命名模板
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NamingTemplate(String);

impl NamingTemplate {
    /// 创建模板，要求恰好包含一个 `%s`
    pub fn new<S: Into<String>>(pattern: S) -> DatastoreResult<Self> {
        let pattern = pattern.into();
        let count = pattern.matches(PLACEHOLDER).count();
        if count != 1 {
            return Err(crate::datastore_error!(
                config,
                format!("命名模板必须恰好包含一个 {}: '{}'", PLACEHOLDER, pattern)
            ));
        }
        Ok(Self(pattern))
    }

    /// 前缀模板 `<prefix>_%s`
    pub fn prefixed(prefix: &str) -> DatastoreResult<Self> {
        Self::new(format!("{}_{}", prefix, PLACEHOLDER))
    }

    /// 后缀模板 `%s_<suffix>`
    pub fn suffixed(suffix: &str) -> DatastoreResult<Self> {
        Self::new(format!("{}_{}", PLACEHOLDER, suffix))
    }

    /// 用基础集合名替换占位符
    pub fn apply(&self, base: &str) -> String {
        self.0.replacen(PLACEHOLDER, base, 1)
    }

    /// 原始模板字符串
    pub fn pattern(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamingTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 应用可选模板，无模板时原样返回
pub fn apply_template(template: Option<&NamingTemplate>, base: &str) -> String {
    match template {
        Some(t) => t.apply(base),
        None => base.to_string(),
    }
}
