//! 组卷约束配置
//!
//! 每个科目/试卷的组卷规则都表达为一份声明式的 [`PaperBlueprint`]：
//! 大题列表、每道大题的配额、题型替补链、排序策略以及各类容差。
//! 引擎只有一套，差异全部体现在数据里。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, Result};

/// 闭区间 [min, max]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
}

impl Bounds {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max
    }
}

impl std::fmt::Display for Bounds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}–{}", self.min, self.max)
    }
}

/// 一份试卷的完整组卷约束
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperBlueprint {
    pub name: String,
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
    /// 题量/分值不固定的卷型（如生物一卷）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flexible: Option<FlexibleLayout>,
    #[serde(default)]
    pub tolerances: Tolerances,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub ordering: OrderingPolicy,
    /// 全卷按分值的题量上限
    #[serde(default)]
    pub mark_caps: Vec<MarkCap>,
}

fn default_max_attempts() -> u32 {
    50
}

/// 大题定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub name: String,
    /// "M 选 N"：只需作答其中 N 题；为空表示全部必答
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<u32>,
    /// 只从题库中带该分区标记的题目里选
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_section: Option<String>,
    #[serde(default)]
    pub quotas: Vec<Quota>,
}

impl SectionSpec {
    pub fn question_count(&self) -> u32 {
        self.quotas.iter().map(|q| q.count).sum()
    }
}

/// 配额：N 道指定形态的题
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub count: u32,
    pub marks: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// 主分区抽不到题时，按顺序尝试的替补分区（分值不变）
    #[serde(default)]
    pub fallbacks: Vec<Fallback>,
}

impl Quota {
    pub fn new(count: u32, marks: u32) -> Self {
        Self {
            label: None,
            count,
            marks,
            nested: None,
            kind: None,
            category: None,
            fallbacks: Vec::new(),
        }
    }

    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = Some(nested);
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn fallback(mut self, fallback: Fallback) -> Self {
        self.fallbacks.push(fallback);
        self
    }
}

/// 替补分区。每个字段完整替换主分区的对应条件，`None` 表示不限
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fallback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl Fallback {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = Some(nested);
        self
    }
}

/// 弹性卷型：多小问题目数量/总分在区间内随机，剩余分值拆成单问题目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexibleLayout {
    /// 弹性配额写入的大题名称（不存在时追加到末尾）
    pub section: String,
    pub nested_count: Bounds,
    pub nested_marks: Bounds,
    /// 单道多小问题目的分值范围
    pub nested_question_marks: Bounds,
    /// 单问题目允许的分值面额，如 {1,2,3}
    pub denominations: Vec<u32>,
    /// 整卷总题量范围（固定大题的题目也计入）
    pub question_count: Bounds,
    #[serde(default = "default_max_draws")]
    pub max_draws: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standalone_kind: Option<String>,
    /// 随机抽取全部失败时使用的已知可行方案
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_plan: Option<FlexiblePlan>,
}

fn default_max_draws() -> u32 {
    100
}

/// 预先算好的弹性方案
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexiblePlan {
    pub nested_count: u32,
    pub nested_marks: u32,
    pub standalone: Vec<MarkCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCount {
    pub marks: u32,
    pub count: u32,
}

/// 各类容差
///
/// 不同卷型历来使用的容差并不一致，这里统一做成可配置项。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tolerances {
    /// 知识点分值允许超出 [min, max] 的分数
    pub topic_marks: u32,
    /// 弹性大题题量/分值构成允许偏离计划的百分比
    pub composition_pct: f64,
    /// 微调阶段允许替换的分值差（0 表示关闭微调）
    pub fine_tune_delta: u32,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            topic_marks: 2,
            composition_pct: 5.0,
            fine_tune_delta: 3,
        }
    }
}

/// 排序策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// 按大题顺序，大题内随机
    #[default]
    BySection,
    /// 大题内按分值由低到高分为前/中/后三段，段内随机
    MarkRamp {
        #[serde(default = "default_early_pct")]
        early_pct: u32,
        #[serde(default = "default_middle_pct")]
        middle_pct: u32,
    },
}

fn default_early_pct() -> u32 {
    40
}

fn default_middle_pct() -> u32 {
    40
}

/// 分值题量上限
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCap {
    pub marks: u32,
    pub max_count: u32,
}

impl PaperBlueprint {
    pub fn section(&self, name: &str) -> Option<&SectionSpec> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn mark_cap(&self, marks: u32) -> Option<u32> {
        self.mark_caps
            .iter()
            .find(|c| c.marks == marks)
            .map(|c| c.max_count)
    }

    /// 检查配置自身是否自相矛盾
    pub fn check(&self) -> Result<()> {
        let invalid = |reason: String| Err(GenerationError::configuration(reason));

        if self.max_attempts == 0 {
            return invalid(format!("布局 {} 的尝试次数不能为 0", self.name));
        }

        if self.sections.is_empty() && self.flexible.is_none() {
            return invalid(format!("布局 {} 没有任何大题", self.name));
        }

        let flexible_section = self.flexible.as_ref().map(|f| f.section.as_str());
        let mut names = HashSet::new();

        for section in &self.sections {
            if !names.insert(section.name.as_str()) {
                return invalid(format!("大题名称重复: {}", section.name));
            }

            let is_flexible = flexible_section == Some(section.name.as_str());
            if section.quotas.is_empty() && !is_flexible {
                return invalid(format!("大题 {} 没有配额", section.name));
            }

            for quota in &section.quotas {
                if quota.count == 0 || quota.marks == 0 {
                    return invalid(format!(
                        "大题 {} 的配额题量和分值必须大于 0 (count={}, marks={})",
                        section.name, quota.count, quota.marks
                    ));
                }
            }

            let mut labels = HashSet::new();
            for label in section.quotas.iter().filter_map(|q| q.label.as_deref()) {
                if !labels.insert(label) {
                    return invalid(format!("大题 {} 的配额名称重复: {}", section.name, label));
                }
            }

            if let Some(answer) = section.answer {
                if is_flexible {
                    return invalid(format!("弹性大题 {} 不支持选做", section.name));
                }
                if answer == 0 || answer > section.question_count() {
                    return invalid(format!(
                        "大题 {} 选做 {} 题，但只有 {} 题",
                        section.name,
                        answer,
                        section.question_count()
                    ));
                }
            }
        }

        if let Some(flexible) = &self.flexible {
            for (label, bounds) in [
                ("nested_count", flexible.nested_count),
                ("nested_marks", flexible.nested_marks),
                ("nested_question_marks", flexible.nested_question_marks),
                ("question_count", flexible.question_count),
            ] {
                if !bounds.is_valid() {
                    return invalid(format!("{} 区间无效: min {} > max {}", label, bounds.min, bounds.max));
                }
            }
            if flexible.nested_question_marks.min == 0 {
                return invalid("多小问题目分值下限必须大于 0".to_string());
            }
            if flexible.denominations.is_empty() || flexible.denominations.contains(&0) {
                return invalid(format!("分值面额无效: {:?}", flexible.denominations));
            }
            if flexible.max_draws == 0 {
                return invalid("弹性方案抽取次数不能为 0".to_string());
            }
        }

        let pct = self.tolerances.composition_pct;
        if !pct.is_finite() || pct < 0.0 {
            return invalid(format!("构成容差百分比无效: {}", pct));
        }

        if let OrderingPolicy::MarkRamp {
            early_pct,
            middle_pct,
        } = self.ordering
        {
            if early_pct + middle_pct > 100 {
                return invalid(format!(
                    "排序分段超过 100%: {} + {}",
                    early_pct, middle_pct
                ));
            }
        }

        if self.mark_caps.iter().any(|c| c.marks == 0) {
            return invalid("分值上限配置中的分值必须大于 0".to_string());
        }

        Ok(())
    }
}
