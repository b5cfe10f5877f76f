//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量组卷和任务调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_generator` - 批量组卷处理器
//! - 管理应用生命周期（初始化、运行）
//! - 加载题库目录，构建组卷请求
//! - 控制并发数量（Semaphore）
//! - 输出全局统计信息
//!
//! ### `paper_generator` - 单次组卷处理器
//! - 委托 GenerationFlow 生成一份试卷
//! - 保存试卷、更新使用次数
//! - 失败时写入 warn.txt
//!
//! ## 层次关系
//!
//! ```text
//! batch_generator (处理 Vec<GenerationRequest>)
//!     ↓
//! paper_generator (处理单个请求)
//!     ↓
//! workflow::GenerationFlow (规划 → 选题 → 排序 → 校验 → 组装)
//!     ↓
//! services (能力层：planner / selector / validator / arranger / assembler / writer)
//!     ↓
//! infrastructure (基础设施：QuestionRepository)
//! ```

pub mod batch_generator;
pub mod paper_generator;

// 重新导出主要类型
pub use batch_generator::{App, RunStats};
pub use paper_generator::{generate_paper, GenerationEnv, GenerationOutcome};
