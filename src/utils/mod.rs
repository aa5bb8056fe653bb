//! # 工具模块
//!
//! 这个模块包含无状态的工具函数：
//!
//! - 内容哈希（缓存键的组成部分）
//! - 时钟抽象（系统时钟与测试用的手动时钟）
//!
//! # 模块组织
//!
//! - `hash` - 文本内容摘要
//! - `clock` - 当前时间来源

pub mod clock;
pub mod hash;

// Re-export commonly used items for convenience
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use hash::content_hash;
