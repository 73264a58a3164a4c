//! # Infrastructure Common
//!
//! 这个 crate 提供了 Lorn ADSP 平台基础设施层的公共类型和工具。
//!
//! ## 核心组件
//!
//! - [`errors`] - 配置、数据源、协调存储与注册中心的错误分类
//! - [`Context`] - 携带截止时间与取消信号的调用上下文
//! - [`duration`] - `300ms` / `1h2m3s` 风格的时长解析与 serde 支持
//! - [`env`] - 进程环境变量约定

pub mod context;
pub mod duration;
pub mod env;
pub mod errors;

pub use context::*;
pub use errors::*;
