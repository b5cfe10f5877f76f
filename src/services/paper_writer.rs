//! 试卷保存服务 - 业务能力层
//!
//! 只负责"把一份生成好的试卷写出去"

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::error::AppError;
use crate::services::assembler::GeneratedPaperResult;

/// 试卷的持久化去处
///
/// 返回保存位置的描述（文件路径、记录ID等），用于日志。
pub trait PaperSink: Send + Sync {
    fn persist(&self, paper: &GeneratedPaperResult) -> Result<String>;
}

/// 以 JSON 文件形式保存到输出目录，每份试卷一个文件
pub struct JsonPaperWriter {
    output_dir: PathBuf,
}

impl JsonPaperWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn path_for(&self, paper: &GeneratedPaperResult) -> PathBuf {
        self.output_dir.join(format!("{}.json", paper.id))
    }
}

impl PaperSink for JsonPaperWriter {
    fn persist(&self, paper: &GeneratedPaperResult) -> Result<String> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("无法创建输出目录: {}", self.output_dir.display()))?;

        let path = self.path_for(paper);
        let json = serde_json::to_string_pretty(paper).map_err(AppError::from)?;

        debug!("写入试卷文件: {} ({} 字节)", path.display(), json.len());
        fs::write(&path, json)
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        Ok(path.display().to_string())
    }
}
