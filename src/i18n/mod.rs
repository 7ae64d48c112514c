//! 多语言错误消息模块
//!
//! 使用rat_embed_lang框架提供统一的错误消息多语言支持

use once_cell::sync::OnceCell;
use rat_embed_lang::register_translations;
use std::collections::HashMap;

static INITIALIZED: OnceCell<()> = OnceCell::new();

/// 错误消息翻译注册器
pub struct ErrorMessageI18n;

impl ErrorMessageI18n {
    fn entry(
        translations: &mut HashMap<String, HashMap<String, String>>,
        key: &str,
        zh: &str,
        en: &str,
    ) {
        let mut messages = HashMap::new();
        messages.insert("zh-CN".to_string(), zh.to_string());
        messages.insert("en-US".to_string(), en.to_string());
        translations.insert(key.to_string(), messages);
    }

    /// 注册所有错误消息翻译
    pub fn register_all_translations() {
        let mut translations = HashMap::new();

        Self::entry(
            &mut translations,
            "error.config",
            "配置错误: {message}",
            "Configuration error: {message}",
        );
        Self::entry(
            &mut translations,
            "error.connection",
            "数据库连接失败: {message}",
            "Database connection failed: {message}",
        );
        Self::entry(
            &mut translations,
            "error.query",
            "查询执行失败: {message}",
            "Query execution failed: {message}",
        );
        Self::entry(
            &mut translations,
            "error.multiple_results",
            "集合 '{collection}' 期望最多一条结果，实际命中 {count} 条",
            "Expected at most one result from '{collection}', but found {count}",
        );
        Self::entry(
            &mut translations,
            "error.key_not_found",
            "注册表中不存在数据源 '{key}'",
            "Datastore '{key}' is not registered",
        );
        Self::entry(
            &mut translations,
            "error.not_initialized",
            "尚未加载数据源配置",
            "Datastore configuration has not been loaded",
        );
        Self::entry(
            &mut translations,
            "error.pool_closed",
            "数据库 '{database}' 的连接池已关闭",
            "Connection pool for database '{database}' is closed",
        );
        Self::entry(
            &mut translations,
            "error.serialization",
            "数据序列化失败: {message}",
            "Data serialization failed: {message}",
        );

        // 注册所有翻译
        register_translations(translations);
    }

    /// 初始化错误消息多语言支持
    pub fn init() {
        Self::register_all_translations();

        // 从环境变量获取语言设置，默认为zh-CN
        let lang = std::env::var("RAT_LANG")
            .or_else(|_| std::env::var("LANG"))
            .unwrap_or_else(|_| "zh-CN".to_string());

        // 标准化语言代码
        use rat_embed_lang::normalize_language_code;
        let normalized_lang = normalize_language_code(&lang);
        set_language(&normalized_lang);
    }
}

/// 确保翻译表已注册，重复调用无副作用
pub fn ensure_initialized() {
    INITIALIZED.get_or_init(ErrorMessageI18n::init);
}

/// 翻译消息
pub fn t(key: &str) -> String {
    ensure_initialized();
    rat_embed_lang::t(key)
}

/// 翻译带参数的消息
pub fn tf(key: &str, args: &[(&str, &str)]) -> String {
    ensure_initialized();
    rat_embed_lang::tf(key, args)
}

/// 重新导出rat_embed_lang的核心函数
pub use rat_embed_lang::{current_language, set_language};
