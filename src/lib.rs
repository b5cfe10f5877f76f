//! # Paper Assembly
//!
//! 一个按布局约束随机抽题、自动组卷的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有题库数据，只暴露查询能力
//! - `QuestionRepository` - 题库查询接口（按试卷、知识点、分值过滤）
//! - `InMemoryRepository` - 由 TOML 题库文件构建的内存题库
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个能力只做一件事
//! - `Planner` - 把满分拆成各大题、各配额的题量和分值
//! - `Selector` - 按知识点权重抽题，必要时回退与微调
//! - `Validator` - 对成卷逐项校验并给出报告
//! - `arranger` / `assembler` - 排序、编号、汇总成试卷记录
//! - `JsonPaperWriter` / `WarnWriter` - 保存试卷、写 warn.txt
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一份试卷"的完整生成流程
//! - `GenerationCtx` - 上下文封装（paper_id + 请求序号 + 尝试次数 + 种子）
//! - `GenerationFlow` - 流程编排（plan → select → arrange → validate → assemble）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_generator` - 批量组卷处理器，管理题库和并发
//! - `orchestrator/paper_generator` - 单次组卷处理器，负责保存与失败记录
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

#[cfg(test)]
mod test_support;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, ErrorKind, GenerationError, Result};
pub use infrastructure::{InMemoryRepository, QuestionRepository};
pub use models::{Paper, PaperBlueprint, Question, Subject, Topic};
pub use orchestrator::{generate_paper, App, RunStats};
pub use services::GeneratedPaperResult;
pub use workflow::{GenerationCtx, GenerationFlow, GenerationRequest};
