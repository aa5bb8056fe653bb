//! Web 路由处理器

pub mod cache;
pub mod files;
pub mod keys;
pub mod pages;
pub mod translation;

pub use cache::*;
pub use files::*;
pub use keys::*;
pub use pages::*;
pub use translation::*;
