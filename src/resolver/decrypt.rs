//! 密码解密扩展点
//!
//! 具体的加密算法属于配置层，这里只定义注入接口

use crate::error::DecryptError;

/// 密码解密器
pub trait PasswordDecryptor: Send + Sync {
    /// 将密文还原为明文
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError>;
}

/// 未配置解密器时使用：原样返回
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextDecryptor;

impl PasswordDecryptor for PlainTextDecryptor {
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        Ok(ciphertext.to_string())
    }
}

impl<F> PasswordDecryptor for F
where
    F: Fn(&str) -> Result<String, DecryptError> + Send + Sync,
{
    fn decrypt(&self, ciphertext: &str) -> Result<String, DecryptError> {
        self(ciphertext)
    }
}
