//! 基础设施层
//!
//! 持有题库数据，只向上层暴露查询能力

pub mod repository;

pub use repository::{InMemoryRepository, QuestionFilter, QuestionRepository};
