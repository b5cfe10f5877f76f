//! 警告写入服务 - 业务能力层
//!
//! 只负责"写 warn.txt"能力，不关心流程

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use tracing::debug;

use crate::error::GenerationError;

/// 警告写入服务
///
/// 职责：
/// - 将生成失败的请求写入 warn.txt
/// - 每次失败写一段：错误类别 + 原因 + 各分区诊断
/// - 不关心流程顺序
pub struct WarnWriter {
    warn_file_path: String,
}

impl WarnWriter {
    pub fn new() -> Self {
        Self {
            warn_file_path: "warn.txt".to_string(),
        }
    }

    /// 使用自定义文件路径创建
    pub fn with_path(path: impl Into<String>) -> Self {
        Self {
            warn_file_path: path.into(),
        }
    }

    /// 写入一次生成失败
    pub fn write(&self, paper_id: &str, topic_ids: &[String], error: &GenerationError) -> Result<()> {
        debug!(
            "写入警告: 试卷 {} | 类别 {} | 诊断 {} 条",
            paper_id,
            error.kind(),
            error.diagnostics().len()
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.warn_file_path)
            .with_context(|| format!("无法打开警告文件: {}", self.warn_file_path))?;

        let topics = if topic_ids.is_empty() {
            "全部".to_string()
        } else {
            topic_ids.join(",")
        };

        let mut warn_msg = format!(
            "[{}] 试卷 {} | 知识点 {} | {} | {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            paper_id,
            topics,
            error.kind(),
            error
        );
        for stat in error.diagnostics() {
            warn_msg.push_str(&format!("    {}\n", stat));
        }

        file.write_all(warn_msg.as_bytes())?;

        Ok(())
    }
}

impl Default for WarnWriter {
    fn default() -> Self {
        Self::new()
    }
}
