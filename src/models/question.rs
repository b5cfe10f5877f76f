use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, Result};
use crate::models::blueprint::PaperBlueprint;
use crate::models::presets;
use crate::models::subject::Subject;

/// 题目难度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// 未标注难度时按分值推断
    pub fn from_marks(marks: u32) -> Self {
        match marks {
            0..=2 => Difficulty::Easy,
            3..=5 => Difficulty::Medium,
            _ => Difficulty::Hard,
        }
    }
}

/// 题库中的一道题（组卷过程只读，使用次数仅在成卷后更新）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: u64,
    /// 题库文件中可省略，装载时补为所属试卷
    #[serde(default)]
    pub paper_id: String,
    pub topic_id: String,
    /// 题目在原题库中的分区标记（如 "A"、"B"）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub marks: u32,
    /// 是否为多小问题目（小问分值之和等于 marks）
    #[serde(default)]
    pub is_nested: bool,
    pub body: String,
    #[serde(default)]
    pub answer: String,
    /// 题型标签，如 essay / graph / structured / name_identify
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub times_used: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl Question {
    /// 获取难度，未标注时按分值推断
    pub fn effective_difficulty(&self) -> Difficulty {
        self.difficulty
            .unwrap_or_else(|| Difficulty::from_marks(self.marks))
    }

    /// 是否有可用的参考答案
    pub fn has_answer(&self) -> bool {
        !self.answer.trim().is_empty()
    }
}

fn default_kind() -> String {
    "structured".to_string()
}

fn default_true() -> bool {
    true
}

/// 知识点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    #[serde(default)]
    pub paper_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_marks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_marks: Option<u32>,
    /// 覆盖试卷级的知识点分值容差
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<u32>,
    /// 分类标记，用于把题目路由到固定大题（如 "is_comprehension"）
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl Topic {
    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    /// 该知识点实际使用的容差
    pub fn tolerance_or(&self, default: u32) -> u32 {
        self.tolerance.unwrap_or(default)
    }
}

/// 试卷定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: String,
    pub subject: Subject,
    pub name: String,
    /// 学生可得满分（"N 选 M" 大题只计入需作答部分）
    pub total_marks: u32,
    #[serde(default = "default_true")]
    pub active: bool,
    /// 内置布局名称，见 `presets::by_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint: Option<PaperBlueprint>,
}

impl Paper {
    /// 解析试卷的组卷约束
    ///
    /// 优先级：显式 blueprint > 命名 preset > 科目默认布局
    pub fn resolve_blueprint(&self) -> Result<PaperBlueprint> {
        if let Some(blueprint) = &self.blueprint {
            return Ok(blueprint.clone());
        }

        if let Some(name) = &self.preset {
            return presets::by_name(name).ok_or_else(|| {
                GenerationError::configuration(format!(
                    "试卷 {} 引用了不存在的布局: {}",
                    self.id, name
                ))
            });
        }

        presets::default_for(self.subject).ok_or_else(|| {
            GenerationError::configuration(format!(
                "试卷 {} ({}) 未配置组卷布局",
                self.id, self.subject
            ))
        })
    }
}
