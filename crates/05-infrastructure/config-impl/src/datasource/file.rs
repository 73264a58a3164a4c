//! 文件配置数据源

use super::DataSourceAddr;
use async_trait::async_trait;
use config_abstractions::{ChangeChannel, ChangeSignal, DataSource};
use infrastructure_common::{DataSourceError, DataSourceResult};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 文件配置数据源
///
/// 开启监听时监控的是文件所在目录而不是文件本身，这样通过重命名替换文件的编辑器也能被感知。
pub struct FileDataSource {
    path: PathBuf,
    dir: PathBuf,
    changed: Arc<ChangeChannel>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl std::fmt::Debug for FileDataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileDataSource")
            .field("path", &self.path)
            .field("dir", &self.dir)
            .field("watching", &self.watcher.lock().is_some())
            .finish()
    }
}

impl FileDataSource {
    /// 创建新的文件数据源
    pub fn new(path: impl AsRef<Path>, watch: bool) -> DataSourceResult<Self> {
        let (dir, path) = resolve(path.as_ref())?;
        let ds = Self {
            path,
            dir,
            changed: Arc::new(ChangeChannel::new()),
            watcher: Mutex::new(None),
        };
        if watch {
            ds.start_watching()?;
        }
        Ok(ds)
    }

    /// 由配置地址创建，`?watch=true` 开启监听
    pub fn from_addr(addr: &DataSourceAddr) -> DataSourceResult<Self> {
        let path = addr
            .path()
            .ok_or_else(|| DataSourceError::invalid_address(addr.as_str(), "缺少文件路径"))?;
        Self::new(path, addr.query_bool("watch", false))
    }

    /// 配置文件的绝对路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn start_watching(&self) -> DataSourceResult<()> {
        let target = self.path.clone();
        let changed = Arc::clone(&self.changed);

        let mut watcher = recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("配置文件监控错误: {}", e);
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                return;
            }
            if event.paths.iter().any(|p| same_file(p, &target)) {
                debug!("配置文件发生变化: {}", target.display());
                changed.notify();
            }
        })
        .map_err(|e| DataSourceError::backend(format!("创建文件监控器失败: {}", e)))?;

        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| DataSourceError::backend(format!("监控目录失败: {}, 原因: {}", self.dir.display(), e)))?;

        info!("开始监控配置文件: {}", self.path.display());
        *self.watcher.lock() = Some(watcher);
        Ok(())
    }
}

fn resolve(path: &Path) -> DataSourceResult<(PathBuf, PathBuf)> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let file_name = absolute
        .file_name()
        .ok_or_else(|| DataSourceError::invalid_address(path.display().to_string(), "不是文件路径"))?
        .to_os_string();
    let parent = absolute.parent().unwrap_or_else(|| Path::new("/"));
    let dir = parent.canonicalize()?;
    let path = dir.join(file_name);
    Ok((dir, path))
}

fn same_file(event_path: &Path, target: &Path) -> bool {
    event_path == target
        || event_path
            .canonicalize()
            .map(|p| p == target)
            .unwrap_or(false)
}

#[async_trait]
impl DataSource for FileDataSource {
    async fn read_config(&self) -> DataSourceResult<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    fn is_config_changed(&self) -> Option<ChangeSignal> {
        if self.watcher.lock().is_none() {
            return None;
        }
        self.changed.take_signal()
    }

    async fn close(&self) -> DataSourceResult<()> {
        self.watcher.lock().take();
        self.changed.close();
        Ok(())
    }

    fn name(&self) -> &str {
        super::SCHEME_FILE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_read_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "name = \"demo\"\n").unwrap();

        let ds = FileDataSource::new(&path, false).unwrap();
        assert_eq!(ds.read_config().await.unwrap(), b"name = \"demo\"\n");
        assert!(ds.is_config_changed().is_none(), "未开启监听时没有变更信号");
    }

    #[tokio::test]
    async fn test_watch_detects_rewrite_and_ignores_siblings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "v = 1\n").unwrap();

        let ds = FileDataSource::new(&path, true).unwrap();
        let mut signal = ds.is_config_changed().expect("开启监听后应有变更信号");

        std::fs::write(dir.path().join("other.toml"), "x = 1\n").unwrap();
        let sibling = tokio::time::timeout(Duration::from_millis(300), signal.changed()).await;
        assert!(sibling.is_err(), "同目录下的其它文件不应触发变更");

        std::fs::write(&path, "v = 2\n").unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(5), signal.changed()).await;
        assert_eq!(changed.ok().flatten(), Some(()));

        ds.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_error() {
        let result = FileDataSource::new("/definitely/not/here/app.toml", false);
        assert!(matches!(result, Err(DataSourceError::Io { .. })));
    }
}
