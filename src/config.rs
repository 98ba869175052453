//! Application configuration module / 应用配置模块
//!
//! Manages configuration loaded from config.json
//! Creates default config file on first run / 首次运行时创建默认配置文件

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, SyncError};

/// Global configuration instance / 全局配置实例
static CONFIG: OnceCell<Arc<RwLock<AppConfig>>> = OnceCell::new();

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Index storage configuration / 索引存储配置
    #[serde(default)]
    pub index: IndexConfig,
    /// Reconciliation configuration / 同步配置
    #[serde(default)]
    pub sync: SyncConfig,
    /// Background queue configuration / 后台队列配置
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Index storage configuration / 索引存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Data directory path / 数据目录路径
    pub data_dir: String,
    /// Index database file (relative to data_dir) / 索引数据库文件
    pub db_file: String,
    /// SQLite busy timeout in milliseconds / 锁等待超时
    pub busy_timeout_ms: u64,
    /// Optional index of all content, unpublished included / 内部索引数据库文件
    #[serde(default)]
    pub internal_db_file: Option<String>,
}

/// Reconciliation configuration / 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Protected ids per index lookup / 每批受保护ID数量
    pub sweep_batch_size: usize,
    /// Index lookup page size / 索引查询分页大小
    pub sweep_page_size: usize,
    /// Descendant enumeration page size / 子孙节点分页大小
    pub descendant_page_size: usize,
}

/// Background queue configuration / 后台队列配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of workers / 工作线程数
    pub workers: usize,
    /// Attempts per deferred action, including the first / 最大尝试次数
    pub max_attempts: u32,
    /// Delay between attempts / 重试间隔
    pub retry_delay_ms: u64,
    /// Finished tasks kept in memory / 保留的已完成任务数
    pub history_limit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            db_file: "content_index.db".to_string(),
            busy_timeout_ms: 5000,
            internal_db_file: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sweep_batch_size: 50,
            sweep_page_size: 500,
            descendant_page_size: 500,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            max_attempts: 3,
            retry_delay_ms: 5000,
            history_limit: 256,
        }
    }
}

impl AppConfig {
    /// Get the full data directory path / 获取完整的数据目录路径
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(&self.index.data_dir)
    }

    /// Get the full index database path / 获取索引数据库路径
    pub fn get_index_db_path(&self) -> PathBuf {
        self.get_data_dir().join(&self.index.db_file)
    }

    /// Get the internal index database path, if one is configured / 获取内部索引路径
    pub fn get_internal_index_db_path(&self) -> Option<PathBuf> {
        self.index.internal_db_file.as_ref().map(|file| self.get_data_dir().join(file))
    }

    fn validate(&self) -> Result<()> {
        if self.sync.sweep_batch_size == 0 || self.sync.sweep_page_size == 0 {
            return Err(SyncError::Config("sweep batch and page sizes must be positive".into()));
        }
        if self.sync.descendant_page_size == 0 {
            return Err(SyncError::Config("descendant_page_size must be positive".into()));
        }
        if self.index.internal_db_file.as_deref() == Some(self.index.db_file.as_str()) {
            return Err(SyncError::Config("internal_db_file must differ from db_file".into()));
        }
        if self.queue.workers == 0 || self.queue.max_attempts == 0 {
            return Err(SyncError::Config("queue needs at least one worker and one attempt".into()));
        }
        Ok(())
    }
}

/// Get the config file path / 获取配置文件路径
fn get_config_path() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("config.json")
}

/// Load configuration from config.json in the working directory / 加载配置文件
pub fn load_config() -> Result<AppConfig> {
    load_config_from(&get_config_path())
}

/// Load configuration from file, or create default if not exists / 加载配置文件，不存在则创建默认配置
pub fn load_config_from(config_path: &Path) -> Result<AppConfig> {
    if config_path.exists() {
        let content = std::fs::read_to_string(config_path)
            .map_err(|e| SyncError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| SyncError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    } else {
        let config = AppConfig::default();
        save_config_to(&config, config_path)?;
        tracing::info!("Created default configuration at {:?}", config_path);
        Ok(config)
    }
}

/// Save configuration to file / 保存配置到文件
pub fn save_config_to(config: &AppConfig, config_path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(config_path, content)?;
    Ok(())
}

/// Initialize global configuration / 初始化全局配置
pub fn init_config(config: AppConfig) -> Result<Arc<RwLock<AppConfig>>> {
    let config_arc = Arc::new(RwLock::new(config));

    CONFIG
        .set(config_arc.clone())
        .map_err(|_| SyncError::Config("Config already initialized".to_string()))?;

    Ok(config_arc)
}

/// Get global configuration instance / 获取全局配置实例
pub fn get_config() -> Arc<RwLock<AppConfig>> {
    CONFIG
        .get_or_init(|| {
            let config = load_config().unwrap_or_default();
            Arc::new(RwLock::new(config))
        })
        .clone()
}

/// Get a read-only snapshot of current config / 获取当前配置的只读快照
pub fn config() -> AppConfig {
    get_config().read().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.sweep_batch_size, 50);
        assert_eq!(config.sync.sweep_page_size, 500);
        assert_eq!(config.queue.max_attempts, 3);

        // Second load reads the file back / 再次加载读取已有文件
        let reloaded = load_config_from(&path).unwrap();
        assert_eq!(reloaded.index.db_file, config.index.db_file);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "queue": { "workers": 4, "max_attempts": 1, "retry_delay_ms": 10, "history_limit": 8 } }"#).unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.queue.workers, 4);
        assert_eq!(config.sync.sweep_batch_size, 50);
        assert_eq!(config.get_index_db_path(), PathBuf::from("data").join("content_index.db"));
        assert_eq!(config.get_internal_index_db_path(), None);
    }

    #[test]
    fn test_internal_index_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "index": { "data_dir": "data", "db_file": "content_index.db", "busy_timeout_ms": 100, "internal_db_file": "internal_index.db" } }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.get_internal_index_db_path(), Some(PathBuf::from("data").join("internal_index.db")));

        std::fs::write(
            &path,
            r#"{ "index": { "data_dir": "data", "db_file": "same.db", "busy_timeout_ms": 100, "internal_db_file": "same.db" } }"#,
        )
        .unwrap();
        assert!(matches!(load_config_from(&path), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "sync": { "sweep_batch_size": 0, "sweep_page_size": 500, "descendant_page_size": 500 } }"#).unwrap();

        assert!(matches!(load_config_from(&path), Err(SyncError::Config(_))));
    }
}
