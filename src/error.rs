use serde::Serialize;
use thiserror::Error;

use crate::services::pool::PartitionStat;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 组卷错误
    #[error("组卷错误: {0}")]
    Generation(#[from] GenerationError),
    /// 文件操作错误
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
}

/// 组卷错误
///
/// 除 `ConfigurationInvalid` / `PlanningInfeasible` 外，其余错误只会在
/// 尝试次数耗尽之后抛出；单次尝试内部的失败全部静默重试。
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// 试卷/知识点引用缺失或停用，或约束配置自相矛盾
    #[error("配置无效: {reason}")]
    ConfigurationInvalid { reason: String },

    /// 题库不足：某些配额在全部尝试中都无法填满
    #[error(
        "题库不足 (试卷: {paper_id}, 尝试 {attempts} 次): {}",
        format_deficits(.deficits)
    )]
    InsufficientPool {
        paper_id: String,
        attempts: u32,
        deficits: Vec<PartitionStat>,
    },

    /// 分值无法按给定面额拆分
    #[error("分值规划不可行: {reason}")]
    PlanningInfeasible { reason: String },

    /// 题量足够，但完整选题始终无法通过校验
    #[error(
        "校验失败 (试卷: {paper_id}, 尝试 {attempts} 次): {}",
        .failed_checks.join("; ")
    )]
    ValidationFailed {
        paper_id: String,
        attempts: u32,
        failed_checks: Vec<String>,
        pool: Vec<PartitionStat>,
    },
}

/// 机器可读的错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigurationInvalid,
    InsufficientPool,
    PlanningInfeasible,
    ValidationFailed,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConfigurationInvalid => "configuration_invalid",
            ErrorKind::InsufficientPool => "insufficient_pool",
            ErrorKind::PlanningInfeasible => "planning_infeasible",
            ErrorKind::ValidationFailed => "validation_failed",
        };
        f.write_str(name)
    }
}

impl GenerationError {
    /// 获取错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::ConfigurationInvalid { .. } => ErrorKind::ConfigurationInvalid,
            GenerationError::InsufficientPool { .. } => ErrorKind::InsufficientPool,
            GenerationError::PlanningInfeasible { .. } => ErrorKind::PlanningInfeasible,
            GenerationError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
        }
    }

    /// 获取题库分区诊断信息（致命配置错误没有诊断）
    pub fn diagnostics(&self) -> &[PartitionStat] {
        match self {
            GenerationError::InsufficientPool { deficits, .. } => deficits,
            GenerationError::ValidationFailed { pool, .. } => pool,
            _ => &[],
        }
    }

    /// 是否为不需要重试的致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GenerationError::ConfigurationInvalid { .. } | GenerationError::PlanningInfeasible { .. }
        )
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        GenerationError::ConfigurationInvalid {
            reason: reason.into(),
        }
    }

    pub fn infeasible(reason: impl Into<String>) -> Self {
        GenerationError::PlanningInfeasible {
            reason: reason.into(),
        }
    }
}

fn format_deficits(deficits: &[PartitionStat]) -> String {
    deficits
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    /// 目录不存在
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },

    /// 读取文件失败
    #[error("读取文件失败 ({path}): {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 写入文件失败
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    /// JSON 序列化失败
    #[error("JSON序列化失败: {0}")]
    JsonEncodeFailed(#[from] serde_json::Error),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },

    /// 题库中存在重复的题目ID
    #[error("题目ID重复: {id}")]
    DuplicateQuestionId { id: u64 },

    /// 题库中存在重复的试卷ID
    #[error("试卷ID重复: {id}")]
    DuplicatePaperId { id: String },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件读取错误
    pub fn file_read_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::ReadFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::File(FileError::JsonEncodeFailed(err))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = std::result::Result<T, AppError>;

/// 组卷结果类型
pub type Result<T> = std::result::Result<T, GenerationError>;
