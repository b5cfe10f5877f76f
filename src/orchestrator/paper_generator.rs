//! 单次组卷处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块负责处理一个组卷请求，是请求级别的编排器。
//!
//! ## 核心功能
//!
//! 1. **流程调度**：委托 `GenerationFlow` 生成试卷
//! 2. **成卷收尾**：保存试卷、更新题目使用次数
//! 3. **失败兜底**：把失败原因和分区诊断写入 warn.txt
//! 4. **统计输出**：记录到输出日志文件

use crate::error::ErrorKind;
use crate::infrastructure::QuestionRepository;
use crate::services::{finalize, PaperSink, WarnWriter};
use crate::utils::logging::{append_log_line, truncate_text};
use crate::workflow::{GenerationFlow, GenerationRequest};
use anyhow::Result;
use tracing::{info, warn};

/// 组卷结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    /// 成卷并已保存
    Generated {
        result_id: String,
        location: String,
        question_count: usize,
    },
    /// 生成失败（已写入 warn.txt）
    Failed(ErrorKind),
}

impl GenerationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationOutcome::Generated { .. })
    }
}

/// 单次组卷需要的外部能力
pub struct GenerationEnv<'a> {
    pub repository: &'a dyn QuestionRepository,
    pub sink: &'a dyn PaperSink,
    pub warn_writer: &'a WarnWriter,
    pub log_file: &'a str,
}

/// 处理一个组卷请求
///
/// # 返回
/// 生成失败不算错误，返回 `GenerationOutcome::Failed`；
/// 只有保存失败等收尾错误才返回 `Err`
pub fn generate_paper(
    flow: &GenerationFlow,
    request: &GenerationRequest,
    env: &GenerationEnv<'_>,
) -> Result<GenerationOutcome> {
    log_request_start(request);

    match flow.generate(env.repository, request) {
        Ok(result) => {
            let location = finalize(&result, env.repository, env.sink)?;

            if let Some(first) = result.questions.first() {
                info!(
                    "[请求 {}] 第 1 题: {}",
                    request.index,
                    truncate_text(&first.body, 60)
                );
            }
            if result.fallback_count() > 0 {
                info!(
                    "[请求 {}] {} 道题使用了替补分区",
                    request.index,
                    result.fallback_count()
                );
            }

            record(
                env.log_file,
                &format!(
                    "✓ 请求 {} | 试卷 {} | {} 道题 | 满分 {} | 尝试 {} 次 | {}",
                    request.index,
                    result.paper_id,
                    result.question_count(),
                    result.total_marks,
                    result.stats.attempts,
                    location
                ),
            );

            Ok(GenerationOutcome::Generated {
                result_id: result.id.clone(),
                location,
                question_count: result.question_count(),
            })
        }
        Err(e) => {
            warn!("[请求 {}] ⚠️ 组卷失败，写入 warn.txt: {}", request.index, e);
            if let Err(write_err) = env.warn_writer.write(&request.paper_id, &request.topic_ids, &e) {
                warn!("[请求 {}] ⚠️ warn.txt 写入失败: {:#}", request.index, write_err);
            }

            // 配置类错误重跑也不会成功，单独标出
            let hint = if e.is_fatal() { " | 需修改题库或布局配置" } else { "" };
            record(
                env.log_file,
                &format!(
                    "✗ 请求 {} | 试卷 {} | {}{}",
                    request.index,
                    request.paper_id,
                    e.kind(),
                    hint
                ),
            );

            Ok(GenerationOutcome::Failed(e.kind()))
        }
    }
}

fn record(log_file: &str, line: &str) {
    if let Err(e) = append_log_line(log_file, line) {
        warn!("⚠️ 日志文件写入失败: {:#}", e);
    }
}

// ========== 日志辅助函数 ==========

fn log_request_start(request: &GenerationRequest) {
    let topics = if request.topic_ids.is_empty() {
        "全部".to_string()
    } else {
        request.topic_ids.join(",")
    };
    info!(
        "[请求 {}] 开始组卷: 试卷 {} | 知识点 {}",
        request.index, request.paper_id, topics
    );
}
