// src/logging/runtime_logger.rs

use chrono::{FixedOffset, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task;
use tokio::time::{self, Duration};
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::fmt::MakeWriter;

/// 分文件存储的日志级别
const LEVELS: [&str; 5] = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
const RETENTION_HOURS: u64 = 72;

/// 单条日志消息
pub struct LogEntry {
    pub level: String,
    pub content: String,
}

enum LogCommand {
    Write(LogEntry),
    /// 立即刷盘，完成后回执
    Flush(oneshot::Sender<()>),
}

/// 运行日志管理器（RuntimeLogger）
/// 将运行时日志按日志级别分流到不同的日志文件中，由后台任务批量写入。
pub struct RuntimeLogger {
    sender: Sender<LogCommand>,
}

/// 东八区 RFC3339 时间戳
pub fn local_timestamp() -> String {
    match FixedOffset::east_opt(8 * 3600) {
        Some(tz) => Utc::now().with_timezone(&tz).to_rfc3339(),
        None => Utc::now().to_rfc3339(),
    }
}

impl RuntimeLogger {
    /// 创建一个新的 RuntimeLogger
    ///
    /// - `log_dir`: 日志文件存放目录
    /// - `file_prefix`: 文件前缀，例如 "runtime"（最终文件名形如 runtime_info.json.2025-01-01-08）
    /// - `buffer_size`: mpsc 通道缓冲区大小
    /// - `batch_size`: 每个日志级别批量写入的日志条数
    /// - `flush_interval`: 定时刷新日志的时间间隔（毫秒）
    pub fn new(
        log_dir: &str,
        file_prefix: &str,
        buffer_size: usize,
        batch_size: usize,
        flush_interval: u64,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let log_files: HashMap<String, Arc<RollingFileAppender>> = LEVELS
            .iter()
            .map(|level| {
                let file_name = format!("{}_{}.json", file_prefix, level.to_lowercase());
                (level.to_string(), Arc::new(rolling::hourly(log_dir, file_name)))
            })
            .collect();

        tokio::spawn(Self::background_log_writer(log_files, receiver, batch_size.max(1), flush_interval.max(1)));

        // 每小时清理一次过期日志
        let cleanup_dir = log_dir.to_string();
        tokio::spawn(async move {
            let cleanup_interval = Duration::from_secs(3600);
            loop {
                Self::cleanup_old_logs(&cleanup_dir, RETENTION_HOURS).await;
                time::sleep(cleanup_interval).await;
            }
        });

        Arc::new(Self { sender })
    }

    /// 记录运行日志，接受两个参数：level 和 message
    pub async fn log(&self, level: &str, message: &str) {
        self.log_value(level, json!(message)).await;
    }

    /// 记录结构化日志，`message` 为任意 JSON
    pub async fn log_value(&self, level: &str, message: Value) {
        let level = level.to_uppercase();
        let content = json!({
            "timestamp": local_timestamp(),
            "level": level,
            "message": message
        })
        .to_string();

        if let Err(e) = self.sender.send(LogCommand::Write(LogEntry { level, content })).await {
            tracing::error!(error = %e, "failed to send runtime log message");
        }
    }

    /// 后台日志写入任务
    async fn background_log_writer(
        log_files: HashMap<String, Arc<RollingFileAppender>>,
        mut receiver: Receiver<LogCommand>,
        batch_size: usize,
        flush_interval: u64,
    ) {
        // 每个日志级别独立的缓冲区
        let mut buffers: HashMap<String, Vec<String>> = HashMap::new();
        let mut interval = time::interval(Duration::from_millis(flush_interval));
        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(LogCommand::Write(entry)) => {
                        // 未知级别归入 INFO
                        let level = if log_files.contains_key(&entry.level) { entry.level } else { "INFO".to_string() };
                        let buffer = buffers.entry(level.clone()).or_default();
                        buffer.push(entry.content);
                        if buffer.len() >= batch_size {
                            if let Some(appender) = log_files.get(&level) {
                                Self::write_logs_to_disk(Arc::clone(appender), std::mem::take(buffer)).await;
                            }
                        }
                    }
                    Some(LogCommand::Flush(done)) => {
                        Self::flush_all(&log_files, &mut buffers).await;
                        let _ = done.send(());
                    }
                    None => {
                        Self::flush_all(&log_files, &mut buffers).await;
                        break;
                    }
                },
                _ = interval.tick() => {
                    Self::flush_all(&log_files, &mut buffers).await;
                }
            }
        }
    }

    async fn flush_all(log_files: &HashMap<String, Arc<RollingFileAppender>>, buffers: &mut HashMap<String, Vec<String>>) {
        for (level, buffer) in buffers.iter_mut() {
            if buffer.is_empty() {
                continue;
            }
            if let Some(appender) = log_files.get(level) {
                Self::write_logs_to_disk(Arc::clone(appender), std::mem::take(buffer)).await;
            }
        }
    }

    async fn write_logs_to_disk(file: Arc<RollingFileAppender>, buffer: Vec<String>) {
        let content = buffer.join("\n") + "\n";
        let result = task::spawn_blocking(move || {
            let mut writer = file.make_writer();
            writer.write_all(content.as_bytes())
        })
        .await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "failed to write runtime logs"),
            Err(e) => tracing::error!(error = %e, "runtime log writer task failed"),
        }
    }

    async fn cleanup_old_logs(log_dir: &str, retention_hours: u64) {
        use std::time::SystemTime;
        let retention = std::time::Duration::from_secs(retention_hours * 3600);
        let now = SystemTime::now();
        let mut dir = match tokio::fs::read_dir(log_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                tracing::warn!(log_dir, error = %e, "failed to read log directory");
                return;
            }
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() <= retention {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::info!(path = ?path, "deleted old log file"),
                Err(e) => tracing::warn!(path = ?path, error = %e, "failed to delete old log file"),
            }
        }
    }

    /// 把缓冲区中的日志全部写盘后返回
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.sender.send(LogCommand::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("runtime-logger-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn read_level(dir: &std::path::Path, prefix: &str) -> String {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
            .map(|entry| std::fs::read_to_string(entry.path()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_entries_split_by_level_and_flushed_on_shutdown() {
        let dir = temp_dir();
        let logger = RuntimeLogger::new(dir.to_str().unwrap(), "runtime", 16, 100, 60_000);

        logger.log("INFO", "exchange started").await;
        logger.log("error", "partner catalog missing").await;
        logger.log_value("WARN", json!({"partner": "rubicon", "timeouts": 3})).await;
        logger.shutdown().await;

        let info = read_level(&dir, "runtime_info.json");
        let line: Value = serde_json::from_str(info.lines().next().unwrap()).unwrap();
        assert_eq!(line["level"], json!("INFO"));
        assert_eq!(line["message"], json!("exchange started"));
        assert!(line["timestamp"].as_str().unwrap().ends_with("+08:00"));

        assert!(read_level(&dir, "runtime_error.json").contains("partner catalog missing"));
        assert!(read_level(&dir, "runtime_warn.json").contains("\"timeouts\":3"));
        assert!(read_level(&dir, "runtime_debug.json").is_empty());

        let _ = std::fs::remove_dir_all(dir);
    }
}
