//! 日志系统配置
//!
//! 控制台输出 + 可选的文件持久化。日志文件按启动时间命名、按大小滚动，
//! 启动时清理超过保留天数的旧文件。

use crate::config::LogConfig;
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
const LOG_FILE_PREFIX: &str = "object-uploader.";

const TIMER_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 滚动文件写入器（内部状态）
struct RollingFileInner {
    /// 启动时间戳（YYYY-MM-DD-HHMMSS）
    start_timestamp: String,
    log_dir: PathBuf,
    current_file: Option<File>,
    /// 0 为基础文件，1、2、3... 为滚动文件
    current_index: u32,
    max_file_size: u64,
    current_size: u64,
}

impl RollingFileInner {
    fn file_path(&self, index: u32) -> PathBuf {
        let filename = if index == 0 {
            format!("{}{}.log", LOG_FILE_PREFIX, self.start_timestamp)
        } else {
            format!("{}{}_{}.log", LOG_FILE_PREFIX, self.start_timestamp, index)
        };
        self.log_dir.join(filename)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(self.current_index))?;
        self.current_file = Some(file);
        self.current_size = 0;
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size + buf.len() as u64 > self.max_file_size && self.current_size > 0 {
            if let Some(mut file) = self.current_file.take() {
                file.flush()?;
            }
            self.current_index += 1;
            self.open_current()?;
        }

        match &mut self.current_file {
            Some(file) => {
                let written = file.write(buf)?;
                self.current_size += written as u64;
                Ok(written)
            }
            None => Err(io::Error::new(io::ErrorKind::Other, "日志文件未打开")),
        }
    }

    fn flush_file(&mut self) -> io::Result<()> {
        if let Some(file) = &mut self.current_file {
            file.flush()?;
        }
        Ok(())
    }
}

/// 按大小滚动的日志文件写入器
#[derive(Clone)]
pub struct RollingFileWriter {
    inner: Arc<Mutex<RollingFileInner>>,
}

impl RollingFileWriter {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut inner = RollingFileInner {
            start_timestamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            log_dir,
            current_file: None,
            current_index: 0,
            max_file_size,
            current_size: 0,
        };
        inner.open_current()?;

        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, RollingFileInner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "日志写入器锁已损坏"))
    }
}

impl Write for RollingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock()?.write_data(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock()?.flush_file()
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 环境变量优先于配置中的日志级别。重复初始化时保留已有的订阅器。
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(true);

    let file_writer = if config.enabled {
        match fs::create_dir_all(&config.log_dir)
            .and_then(|_| RollingFileWriter::new(config.log_dir.clone(), config.max_file_size))
        {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!(
                    "创建日志文件失败: {:?}, 错误: {}，回退到仅控制台输出",
                    config.log_dir, e
                );
                None
            }
        }
    } else {
        None
    };

    let Some(writer) = file_writer else {
        if tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .try_init()
            .is_ok()
        {
            info!("日志系统初始化完成（仅控制台输出）");
        }
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(writer);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMER_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    if tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok()
    {
        info!(
            "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
            config.log_dir,
            config.retention_days,
            config.level,
            config.max_file_size as f64 / 1024.0 / 1024.0
        );
    }

    cleanup_old_logs(&config.log_dir, config.retention_days);

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

/// 清理过期日志文件，返回删除数量
fn cleanup_old_logs(log_dir: &Path, retention_days: u32) -> usize {
    let today = Local::now().date_naive();
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut deleted_count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(date) = path
            .file_name()
            .and_then(|s| s.to_str())
            .and_then(extract_date_from_filename)
        else {
            continue;
        };

        if today.signed_duration_since(date) <= retention {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                deleted_count += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }

    if deleted_count > 0 {
        info!("已清理 {} 个过期日志文件", deleted_count);
    }
    deleted_count
}

/// 从日志文件名提取日期
///
/// object-uploader.YYYY-MM-DD-HHMMSS.log / object-uploader.YYYY-MM-DD-HHMMSS_N.log
fn extract_date_from_filename(filename: &str) -> Option<chrono::NaiveDate> {
    let name = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(".log")?;
    let date = name.get(..10)?;
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}
