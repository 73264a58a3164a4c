//! 错误类型定义

use thiserror::Error;

/// 调用上下文错误
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("操作已取消")]
    Canceled,

    #[error("操作超时")]
    DeadlineExceeded,
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置加载失败: {message}")]
    LoadError { message: String },

    #[error("配置键无效: {key}")]
    InvalidKey { key: String },

    #[error("配置解码失败: {key}, 原因: {source}")]
    DecodeError {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("配置文件读取失败: {source}")]
    FileReadError {
        #[from]
        source: std::io::Error,
    },

    #[error("配置类型转换失败: {message}")]
    TypeConversionError { message: String },

    #[error("配置数据源错误: {source}")]
    DataSource {
        #[from]
        source: DataSourceError,
    },
}

impl ConfigError {
    /// 创建加载错误
    pub fn load_error(message: impl Into<String>) -> Self {
        Self::LoadError {
            message: message.into(),
        }
    }

    /// 创建类型转换错误
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversionError {
            message: message.into(),
        }
    }
}

/// 配置数据源错误类型
#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("配置地址为空")]
    ConfigAddrEmpty,

    #[error("配置地址无效: {addr}, 原因: {message}")]
    InvalidAddress { addr: String, message: String },

    #[error("不支持的数据源类型: {scheme}")]
    InvalidDataSource { scheme: String },

    #[error("数据源读取失败: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("HTTP 请求失败: {url}, 原因: {message}")]
    Http { url: String, message: String },

    #[error("配置内容为空: {key}")]
    EmptyContent { key: String },

    #[error("数据源后端错误: {message}")]
    Backend { message: String },

    #[error("协调存储错误: {source}")]
    Store {
        #[from]
        source: StoreError,
    },

    #[error("数据源已关闭")]
    Closed,
}

impl DataSourceError {
    /// 创建地址无效错误
    pub fn invalid_address(addr: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            addr: addr.into(),
            message: message.into(),
        }
    }

    /// 创建后端错误
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// 协调存储错误类型
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("协调存储调用中断: {source}")]
    Context {
        #[from]
        source: ContextError,
    },

    #[error("请求的修订版本已被压缩: 请求 {requested}, 压缩点 {compact_revision}")]
    Compacted {
        requested: i64,
        compact_revision: i64,
    },

    #[error("租约不存在: {lease_id}")]
    LeaseNotFound { lease_id: i64 },

    #[error("协调存储后端错误: {message}")]
    Backend { message: String },

    #[error("协调存储连接已关闭")]
    Closed,
}

impl StoreError {
    /// 创建后端错误
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// 租约会话错误类型
#[derive(Error, Debug, Clone)]
pub enum LeaseError {
    #[error("创建租约会话失败: {key}, 原因: {source}")]
    Grant {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("租约续期失败: {lease_id}, 原因: {source}")]
    KeepAlive {
        lease_id: i64,
        #[source]
        source: StoreError,
    },

    #[error("撤销租约失败: {lease_id}, 原因: {source}")]
    Revoke {
        lease_id: i64,
        #[source]
        source: StoreError,
    },
}

/// 注册中心错误类型
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("写入注册信息失败: {key}, 原因: {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("读取注册信息失败: {key}, 原因: {source}")]
    Read {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("删除注册信息失败: {key}, 原因: {source}")]
    Delete {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("监听注册信息失败: {key}, 原因: {source}")]
    Watch {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("连接注册中心失败: {endpoints}, 原因: {source}")]
    Connect {
        endpoints: String,
        #[source]
        source: StoreError,
    },

    #[error("注册中心租约错误: {source}")]
    Lease {
        #[from]
        source: LeaseError,
    },

    #[error("服务信息编码失败: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },

    #[error("未知的注册中心类型: {kind}")]
    UnknownKind { kind: String },

    #[error("注册中心类型重复注册: {kind}")]
    DuplicateKind { kind: String },

    #[error("注册中心配置错误: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("注册中心已关闭")]
    Closed,
}

/// 基础设施错误类型
#[derive(Error, Debug)]
pub enum InfrastructureError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("数据源错误: {0}")]
    DataSource(#[from] DataSourceError),

    #[error("协调存储错误: {0}")]
    Store(#[from] StoreError),

    #[error("注册中心错误: {0}")]
    Registry(#[from] RegistryError),

    #[error("基础设施启动失败: {message}")]
    BootstrapFailed { message: String },

    #[error("基础设施关闭失败: {message}")]
    ShutdownFailed { message: String },
}

/// 结果类型别名
pub type ConfigResult<T> = Result<T, ConfigError>;
pub type DataSourceResult<T> = Result<T, DataSourceError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type RegistryResult<T> = Result<T, RegistryError>;
pub type InfrastructureResult<T> = Result<T, InfrastructureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConfigError::InvalidKey {
            key: "app.name".to_string(),
        };
        assert_eq!(err.to_string(), "配置键无效: app.name");

        let err = DataSourceError::InvalidDataSource {
            scheme: "zk".to_string(),
        };
        assert!(err.to_string().contains("zk"));
    }

    #[test]
    fn test_error_conversion() {
        let store: StoreError = ContextError::DeadlineExceeded.into();
        assert!(matches!(
            store,
            StoreError::Context {
                source: ContextError::DeadlineExceeded
            }
        ));

        let infra: InfrastructureError = RegistryError::Closed.into();
        assert!(matches!(infra, InfrastructureError::Registry(RegistryError::Closed)));
    }
}
