//! 进程环境变量约定

/// 应用名称
pub const APP_NAME: &str = "APP_NAME";
/// 应用 ID
pub const APP_ID: &str = "APP_ID";
/// 部署组
pub const APP_DEPLOYMENT: &str = "APP_DEPLOYMENT";
/// 日志目录
pub const APP_LOG_DIR: &str = "APP_LOG_DIR";
/// 运行模式
pub const APP_MODE: &str = "APP_MODE";
/// 地域
pub const APP_REGION: &str = "APP_REGION";
/// 可用区
pub const APP_ZONE: &str = "APP_ZONE";
/// 主机名
pub const APP_HOST: &str = "APP_HOST";
/// 实例标识
pub const APP_INSTANCE: &str = "APP_INSTANCE";
/// 容器 IP
pub const POD_IP: &str = "POD_IP";
/// 容器名称
pub const POD_NAME: &str = "POD_NAME";

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// 当前主机名，依次读取 `APP_HOST`、`HOSTNAME`，都不存在时返回 `localhost`
pub fn hostname() -> String {
    non_empty(APP_HOST)
        .or_else(|| non_empty("HOSTNAME"))
        .unwrap_or_else(|| "localhost".to_string())
}

/// 应用名称
pub fn app_name() -> String {
    non_empty(APP_NAME).unwrap_or_default()
}

/// 部署组
pub fn deployment() -> String {
    non_empty(APP_DEPLOYMENT).unwrap_or_default()
}

/// 地域
pub fn region() -> String {
    non_empty(APP_REGION).unwrap_or_default()
}

/// 可用区
pub fn zone() -> String {
    non_empty(APP_ZONE).unwrap_or_default()
}
