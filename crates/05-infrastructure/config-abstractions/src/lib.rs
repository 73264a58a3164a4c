//! # Configuration Abstractions
//!
//! 配置管理抽象层，定义配置数据源与配置树之间的约定。
//!
//! ## 核心接口
//!
//! - [`DataSource`] - 配置数据源接口，提供原始字节与变更信号
//! - [`ChangeChannel`] / [`ChangeSignal`] - 深度为 1 的合并式变更通知
//! - [`Unmarshal`] / [`ConfigFormat`] - 配置内容解析
//! - [`ConfigChanges`] - 一次应用产生的差异集合
//! - [`GetOptions`] - 结构化解码选项

pub mod datasource;
pub mod events;
pub mod format;
pub mod options;
pub mod signal;

pub use datasource::*;
pub use events::*;
pub use format::*;
pub use options::*;
pub use signal::*;
