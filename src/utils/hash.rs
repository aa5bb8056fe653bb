//! 文本内容摘要

/// 计算文本的稳定摘要（blake3，小写十六进制，64 个字符）
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}
